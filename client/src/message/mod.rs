//! Requests sent to a notary and the replies it sends back.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ServerContext;
use crate::identifier::{AccountId, Amount, NotaryId, NymId, RequestNumber, TransactionNumber};
use crate::instrument::basket::BasketTerms;
use crate::ledger::{BoxType, Ledger, Transaction};
use crate::utilities::crypto::{Certificate, Signable};
use crate::utilities::hash::HashType;
use crate::utilities::time::ClientTime;

pub mod outbuffer;
pub mod transport;

pub use outbuffer::MessageOutbuffer;
pub use transport::{SendOutcome, Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageType {
    RegisterNym,
    UnregisterNym,
    GetRequestNumber,
    GetTransactionNumbers,
    GetNymbox,
    GetBoxReceipt,
    GetAccountData,
    ProcessNymbox,
    ProcessInbox,
    NotarizeTransaction,
    IssueBasket,
}

impl MessageType {
    /// Messages that only read notary state. The notary drops no reply notice for them.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            MessageType::GetRequestNumber
                | MessageType::GetNymbox
                | MessageType::GetBoxReceipt
                | MessageType::GetAccountData
        )
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::RegisterNym => "registerNym",
            MessageType::UnregisterNym => "unregisterNym",
            MessageType::GetRequestNumber => "getRequestNumber",
            MessageType::GetTransactionNumbers => "getTransactionNumbers",
            MessageType::GetNymbox => "getNymbox",
            MessageType::GetBoxReceipt => "getBoxReceipt",
            MessageType::GetAccountData => "getAccountData",
            MessageType::ProcessNymbox => "processNymbox",
            MessageType::ProcessInbox => "processInbox",
            MessageType::NotarizeTransaction => "notarizeTransaction",
            MessageType::IssueBasket => "issueBasket",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    None,
    Transaction(Box<Transaction>),
    Basket(BasketTerms),
    BoxReceipt {
        box_type: BoxType,
        account_id: Option<AccountId>,
        number: TransactionNumber,
    },
    Account(AccountId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub message_type: MessageType,
    pub nym_id: NymId,
    pub notary_id: NotaryId,
    pub request_number: RequestNumber,
    pub acknowledged_replies: BTreeSet<RequestNumber>,
    pub nymbox_hash: Option<HashType>,
    pub payload: MessagePayload,
    pub timestamp: u64,
    pub certificate: Option<Certificate>,
}

impl Message {
    pub fn new(
        message_type: MessageType,
        nym_id: NymId,
        notary_id: NotaryId,
        payload: MessagePayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type,
            nym_id,
            notary_id,
            request_number: 0,
            acknowledged_replies: BTreeSet::new(),
            nymbox_hash: None,
            payload,
            timestamp: ClientTime::now_millis(),
            certificate: None,
        }
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        match &self.payload {
            MessagePayload::Transaction(transaction) => Some(transaction),
            _ => None,
        }
    }

    /// Assigns the next request number, attaches the context's acknowledgements and signs.
    ///
    /// Done right before sending so that a message that is built but never sent does not
    /// consume a request number.
    pub fn stamp(&mut self, context: &mut ServerContext) -> anyhow::Result<()> {
        self.request_number = context.next_request_number();
        self.acknowledged_replies = context.acknowledged_replies().clone();
        self.nymbox_hash = context.nymbox_hash();
        self.timestamp = ClientTime::now_millis();
        self.sign(context.keypair())?;
        log::debug!(
            "Stamped {} with request number {}",
            self.message_type,
            self.request_number
        );
        Ok(())
    }
}

impl Signable for Message {
    fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    fn set_certificate(&mut self, certificate: Option<Certificate>) {
        self.certificate = certificate;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyPayload {
    None,
    Transaction(Box<Transaction>),
    Ledger(Ledger),
    AccountData {
        balance: Amount,
        inbox: Ledger,
        outbox: Ledger,
    },
    BoxReceipt(Box<Transaction>),
    RequestNumber(RequestNumber),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub message_type: MessageType,
    pub nym_id: NymId,
    pub notary_id: NotaryId,
    pub request_number: RequestNumber,
    pub success: bool,
    pub payload: ReplyPayload,
    /// Request numbers whose reply notices the notary has removed from the Nymbox.
    pub acknowledged_replies: BTreeSet<RequestNumber>,
    pub certificate: Option<Certificate>,
}

impl Reply {
    pub fn new(message: &Message, success: bool, payload: ReplyPayload) -> Self {
        Self {
            message_type: message.message_type,
            nym_id: message.nym_id.clone(),
            notary_id: message.notary_id.clone(),
            request_number: message.request_number,
            success,
            payload,
            acknowledged_replies: BTreeSet::new(),
            certificate: None,
        }
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        match &self.payload {
            ReplyPayload::Transaction(transaction) => Some(transaction),
            _ => None,
        }
    }
}

impl Signable for Reply {
    fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    fn set_certificate(&mut self, certificate: Option<Certificate>) {
        self.certificate = certificate;
    }
}
