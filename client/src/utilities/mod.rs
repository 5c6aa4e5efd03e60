pub mod crypto;
pub(crate) mod encoding;
pub mod hash;
pub(crate) mod time;

pub use crypto::{Certificate, Keypair, PublicKey, Signable};
pub use hash::HashType;
