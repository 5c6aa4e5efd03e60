use std::fmt::{Debug, Display, Formatter};

use digest::consts::U32;
use digest::Digest;
use serde::{Deserialize, Serialize};

use crate::utilities::encoding;

type Blake2b256 = blake2::Blake2b<U32>;

pub fn blake2_256(data: &[u8]) -> [u8; 32] {
    let mut dest = [0; 32];
    dest.copy_from_slice(Blake2b256::digest(data).as_slice());
    dest
}

/// Digest used for box receipts, ledger snapshots and balance agreements.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct HashType([u8; 32]);

impl HashType {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn inner(&self) -> [u8; 32] {
        self.0
    }

    pub fn digest(data: &[u8]) -> Self {
        Self(blake2_256(data))
    }

    /// Hash of the canonical encoding of `value`.
    pub fn of<T: Serialize>(value: &T) -> anyhow::Result<Self> {
        let bytes = encoding::encode(value)?;
        Ok(Self::digest(&bytes))
    }
}

impl From<[u8; 32]> for HashType {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Display for HashType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", encoding::to_base58(self.0))
    }
}

impl Debug for HashType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "HashType({})", encoding::to_hex(self.0))
    }
}
