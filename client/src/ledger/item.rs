use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::agreement::StatementDigests;
use crate::identifier::{AccountId, Amount, TransactionNumber};
use crate::ledger::transaction::{Attachment, TransactionType};
use crate::utilities::crypto::{Certificate, Signable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemType {
    // Requests carried by notarizeTransaction
    Transfer,
    Deposit,
    WithdrawVoucher,
    MarketOffer,
    PaymentPlan,
    SmartContract,
    CancelCronItem,
    ExchangeBasket,
    PayDividend,
    // Inbox responses
    AcceptPending,
    RejectPending,
    AcceptItemReceipt,
    DisputeItemReceipt,
    AcceptCronReceipt,
    DisputeCronReceipt,
    AcceptFinalReceipt,
    DisputeFinalReceipt,
    AcceptBasketReceipt,
    DisputeBasketReceipt,
    // Nymbox responses
    AcceptTransaction,
    AcceptMessage,
    AcceptNotice,
    // Statements
    BalanceStatement,
    TransactionStatement,
}

impl ItemType {
    pub fn is_statement(&self) -> bool {
        matches!(self, ItemType::BalanceStatement | ItemType::TransactionStatement)
    }

    /// Inbox responses that accept (rather than reject or dispute) a receipt.
    pub fn is_acceptance(&self) -> bool {
        matches!(
            self,
            ItemType::AcceptPending
                | ItemType::AcceptItemReceipt
                | ItemType::AcceptCronReceipt
                | ItemType::AcceptFinalReceipt
                | ItemType::AcceptBasketReceipt
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Request,
    Acknowledgement,
    Rejection,
}

/// One signed statement inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub item_type: ItemType,
    pub status: ItemStatus,
    pub account_id: Option<AccountId>,
    pub destination_account: Option<AccountId>,
    pub amount: Amount,
    /// Transaction or box receipt this item refers to.
    pub in_reference_to: TransactionNumber,
    /// Type of the box receipt this item responds to, for inbox and Nymbox responses.
    pub receipt_type: Option<TransactionType>,
    /// Statements: the Nym's issued numbers. Responses: numbers accepted or closed.
    pub numbers: BTreeSet<TransactionNumber>,
    pub digests: Option<StatementDigests>,
    pub attachment: Option<Attachment>,
    pub note: Option<String>,
    pub certificate: Option<Certificate>,
}

impl Item {
    pub fn new(item_type: ItemType, account_id: Option<AccountId>) -> Self {
        Self {
            item_type,
            status: ItemStatus::Request,
            account_id,
            destination_account: None,
            amount: 0,
            in_reference_to: 0,
            receipt_type: None,
            numbers: BTreeSet::new(),
            digests: None,
            attachment: None,
            note: None,
            certificate: None,
        }
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_reference(mut self, in_reference_to: TransactionNumber) -> Self {
        self.in_reference_to = in_reference_to;
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_acknowledged(&self) -> bool {
        self.status == ItemStatus::Acknowledgement
    }
}

impl Signable for Item {
    fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    fn set_certificate(&mut self, certificate: Option<Certificate>) {
        self.certificate = certificate;
    }
}
