//! Identities and scalar values used across the protocol.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::utilities::crypto::PublicKey;
use crate::utilities::encoding;
use crate::utilities::hash::HashType;

/// Server-issued number authorising one transaction. Meaningful only for a (Nym, notary) pair.
pub type TransactionNumber = i64;

/// Per (Nym, notary) message sequence number used for replay protection.
pub type RequestNumber = i64;

pub type Amount = i64;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new<S: Into<String>>(id: S) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

identifier!(
    /// Cryptographic identity of a party, independent of any notary.
    NymId
);
identifier!(
    /// The notary (server) that issues numbers and adjudicates transactions.
    NotaryId
);
identifier!(AccountId);
identifier!(
    /// Asset type (unit) an account is denominated in.
    InstrumentDefinitionId
);

impl NymId {
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = HashType::digest(&public_key.to_raw_vec());
        NymId(encoding::to_base58(digest.inner()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utilities::crypto::Keypair;

    #[test]
    fn test_nym_id_is_stable_for_key() {
        let keypair = Keypair::generate();
        let first = NymId::from_public_key(&keypair.public_key());
        let second = NymId::from_public_key(&keypair.public_key());
        assert_eq!(first, second);

        let other = NymId::from_public_key(&Keypair::generate().public_key());
        assert_ne!(first, other);
    }
}
