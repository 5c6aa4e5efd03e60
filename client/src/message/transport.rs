use thiserror::Error;

use crate::message::{Message, Reply};

#[derive(Error, Debug)]
pub enum TransportError {
    /// The message provably never left this process.
    #[error("Message was not sent: {0}")]
    NotSent(String),
}

#[derive(Debug)]
pub enum SendOutcome {
    Replied(Reply),
    /// The message left but no reply arrived. Whether the notary processed it is unknown
    /// until the next Nymbox download.
    NoReply,
}

/// Delivers a signed message to its notary and waits for the reply.
pub trait Transport {
    fn send(&self, message: &Message) -> Result<SendOutcome, TransportError>;
}
