//! Client core for a notary-backed asset protocol.
//!
//! A Nym holds accounts at a notary. Every transaction spends transaction numbers the notary
//! issued to the Nym, carries a balance agreement the notary countersigns, and is settled
//! against the account inbox later. This crate keeps the numbers, builds and signs the
//! requests, applies the replies and reconciles the boxes after lost replies.

pub mod agreement;
pub mod api;
pub mod builder;
pub mod config;
pub mod context;
pub mod identifier;
pub mod inbox;
pub mod instrument;
pub mod ledger;
pub mod logging;
pub mod market;
pub mod message;
pub mod numbers;
pub mod payments;
pub mod reply;
pub mod storage;
pub mod utilities;
pub mod wallet;

#[cfg(test)]
mod testing;

pub use api::{ClientError, NotaryClient, TransactionOutcome};
pub use config::Configuration;
pub use context::ServerContext;
pub use numbers::{ManagedNumber, NumberPool};
