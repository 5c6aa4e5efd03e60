//! Signing and verification used for every item, transaction, message and instrument.
//!
//! Keys are ed25519, handled through `libp2p-identity`. A [Certificate] binds a signature to
//! the public key that produced it so that receivers can check the signer against the Nym or
//! notary they expect.

use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::utilities::encoding;

#[derive(Error, Debug)]
pub enum KeyPairError {
    #[error("Invalid key encoding")]
    InvalidEncoding,
    #[error("Failed to sign: {0}")]
    Signing(String),
    #[error("Unable to deserialize key: '{}'", .0)]
    Deserialization(String),
}

/// An ed25519 keypair. The private part never leaves this type except through
/// [Keypair::to_base58].
#[derive(Clone)]
pub struct Keypair(libp2p_identity::Keypair);

impl Keypair {
    pub fn generate() -> Self {
        Keypair(libp2p_identity::Keypair::generate_ed25519())
    }

    pub fn sign<M: AsRef<[u8]>>(&self, msg: &M) -> Result<Signature, KeyPairError> {
        self.0
            .sign(msg.as_ref())
            .map(Signature)
            .map_err(|e| KeyPairError::Signing(e.to_string()))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public().to_protobuf_encoding())
    }

    pub fn to_base58(&self) -> Result<String, KeyPairError> {
        let raw = self
            .0
            .to_protobuf_encoding()
            .map_err(|e| KeyPairError::Deserialization(e.to_string()))?;
        Ok(encoding::to_base58(raw))
    }

    pub fn from_base58(base58: &str) -> Result<Self, KeyPairError> {
        let raw = encoding::from_base58(base58).map_err(|_| KeyPairError::InvalidEncoding)?;
        let keypair = libp2p_identity::Keypair::from_protobuf_encoding(&raw)
            .map_err(|e| KeyPairError::Deserialization(e.to_string()))?;
        Ok(Keypair(keypair))
    }
}

// Careful with DEBUG, DISPLAY!!!
impl Debug for Keypair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair({})", self.public_key())
    }
}

/// Protobuf-encoded public key. Kept encoded so it can be compared, ordered and hashed.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn verify<M: AsRef<[u8]>>(&self, msg: &M, signature: &Signature) -> bool {
        match libp2p_identity::PublicKey::from_protobuf_encoding(&self.0) {
            Ok(public_key) => public_key.verify(msg.as_ref(), &signature.0),
            Err(err) => {
                log::warn!("Unable to decode public key {self}: {err}");
                false
            }
        }
    }

    pub fn to_raw_vec(&self) -> Vec<u8> {
        self.0.clone()
    }

    pub fn to_base58(&self) -> String {
        encoding::to_base58(&self.0)
    }

    pub fn from_base58(base58: &str) -> Result<Self, KeyPairError> {
        let raw = encoding::from_base58(base58).map_err(|_| KeyPairError::InvalidEncoding)?;
        libp2p_identity::PublicKey::from_protobuf_encoding(&raw)
            .map_err(|e| KeyPairError::Deserialization(e.to_string()))?;
        Ok(PublicKey(raw))
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.to_base58())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let base58 = String::deserialize(deserializer)?;
        PublicKey::from_base58(&base58).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature(Vec<u8>);

impl Debug for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", encoding::to_base58(&self.0))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encoding::to_base58(&self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let base58 = String::deserialize(deserializer)?;
        encoding::from_base58(base58)
            .map(Signature)
            .map_err(serde::de::Error::custom)
    }
}

/// Signature together with the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub(crate) signature: Signature,
    pub(crate) public_key: PublicKey,
}

impl Certificate {
    pub fn prepare<D: Serialize>(keypair: &Keypair, data: &D) -> anyhow::Result<Self> {
        let bytes = encoding::encode(data)?;
        let signature = keypair.sign(&bytes)?;
        Ok(Certificate {
            signature,
            public_key: keypair.public_key(),
        })
    }

    pub fn verify<D: Serialize>(&self, data: &D) -> anyhow::Result<bool> {
        let bytes = encoding::encode(data)?;
        Ok(self.public_key.verify(&bytes, &self.signature))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

/// Anything that carries its own [Certificate].
///
/// The signature covers the canonical encoding of the value with its own certificate removed.
/// Nested signed values (items inside a transaction) keep their certificates and are covered
/// by the outer signature.
pub trait Signable: Serialize + Clone {
    fn certificate(&self) -> Option<&Certificate>;

    fn set_certificate(&mut self, certificate: Option<Certificate>);

    fn unsigned(&self) -> Self {
        let mut copy = self.clone();
        copy.set_certificate(None);
        copy
    }

    fn sign(&mut self, keypair: &Keypair) -> anyhow::Result<()> {
        let certificate = Certificate::prepare(keypair, &self.unsigned())?;
        self.set_certificate(Some(certificate));
        Ok(())
    }

    /// True if the value is signed by `signer` and the signature is valid.
    fn verify_signature(&self, signer: &PublicKey) -> bool {
        match self.certificate() {
            Some(certificate) if certificate.public_key() == signer => {
                match certificate.verify(&self.unsigned()) {
                    Ok(valid) => valid,
                    Err(err) => {
                        log::error!("Failed to encode value for verification: {err}");
                        false
                    }
                }
            }
            Some(_) => false,
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Clone, Serialize)]
    struct Note {
        text: String,
        certificate: Option<Certificate>,
    }

    impl Signable for Note {
        fn certificate(&self) -> Option<&Certificate> {
            self.certificate.as_ref()
        }

        fn set_certificate(&mut self, certificate: Option<Certificate>) {
            self.certificate = certificate;
        }
    }

    fn note(text: &str) -> Note {
        Note {
            text: text.to_string(),
            certificate: None,
        }
    }

    #[test]
    fn test_sign_ok() {
        let keypair = Keypair::generate();
        let mut note = note("hello");
        note.sign(&keypair).unwrap();

        assert!(note.verify_signature(&keypair.public_key()));
    }

    #[test]
    fn test_sign_fail_on_modified_content() {
        let keypair = Keypair::generate();
        let mut note = note("hello");
        note.sign(&keypair).unwrap();
        note.text = "hello!".to_string();

        assert!(!note.verify_signature(&keypair.public_key()));
    }

    #[test]
    fn test_sign_fail_on_other_signer() {
        let keypair = Keypair::generate();
        let other = Keypair::generate();
        let mut note = note("hello");
        note.sign(&keypair).unwrap();

        assert!(!note.verify_signature(&other.public_key()));
    }

    #[test]
    fn test_keypair_base58_round_trip() {
        let keypair = Keypair::generate();
        let encoded = keypair.to_base58().unwrap();
        let decoded = Keypair::from_base58(&encoded).unwrap();

        assert_eq!(keypair.public_key(), decoded.public_key());
    }

    #[test]
    fn test_public_key_serde() {
        let public_key = Keypair::generate().public_key();
        let json = serde_json::to_string(&public_key).unwrap();
        let decoded: PublicKey = serde_json::from_str(&json).unwrap();

        assert_eq!(public_key, decoded);
    }
}
