use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::identifier::{AccountId, Amount, NotaryId, NymId, RequestNumber, TransactionNumber};
use crate::instrument::basket::{BasketExchange, Dividend};
use crate::instrument::Instrument;
use crate::ledger::item::{Item, ItemType};
use crate::market::offer::MarketOffer;
use crate::message::Reply;
use crate::utilities::crypto::{Certificate, Signable};
use crate::utilities::hash::HashType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    // Requests
    Transfer,
    Deposit,
    WithdrawVoucher,
    MarketOffer,
    PaymentPlan,
    SmartContract,
    CancelCronItem,
    ExchangeBasket,
    PayDividend,
    ProcessInbox,
    ProcessNymbox,
    // Notary replies to requests
    AtTransfer,
    AtDeposit,
    AtWithdrawVoucher,
    AtMarketOffer,
    AtPaymentPlan,
    AtSmartContract,
    AtCancelCronItem,
    AtExchangeBasket,
    AtPayDividend,
    AtProcessInbox,
    AtProcessNymbox,
    // Inbox receipts
    Pending,
    TransferReceipt,
    ChequeReceipt,
    VoucherReceipt,
    MarketReceipt,
    PaymentReceipt,
    FinalReceipt,
    BasketReceipt,
    // Nymbox receipts
    Blank,
    SuccessNotice,
    ReplyNotice,
    Notice,
    InstrumentNotice,
    Message,
}

impl TransactionType {
    /// The reply type the notary answers this request with.
    pub fn reply_type(&self) -> Option<TransactionType> {
        let reply = match self {
            TransactionType::Transfer => TransactionType::AtTransfer,
            TransactionType::Deposit => TransactionType::AtDeposit,
            TransactionType::WithdrawVoucher => TransactionType::AtWithdrawVoucher,
            TransactionType::MarketOffer => TransactionType::AtMarketOffer,
            TransactionType::PaymentPlan => TransactionType::AtPaymentPlan,
            TransactionType::SmartContract => TransactionType::AtSmartContract,
            TransactionType::CancelCronItem => TransactionType::AtCancelCronItem,
            TransactionType::ExchangeBasket => TransactionType::AtExchangeBasket,
            TransactionType::PayDividend => TransactionType::AtPayDividend,
            TransactionType::ProcessInbox => TransactionType::AtProcessInbox,
            TransactionType::ProcessNymbox => TransactionType::AtProcessNymbox,
            _ => return None,
        };
        Some(reply)
    }

    /// Requests whose opening number the notary closes as soon as it succeeds.
    ///
    /// Transfers stay open until the transfer receipt is accepted; cron items until their
    /// final receipt.
    pub fn closes_on_success(&self) -> bool {
        matches!(
            self,
            TransactionType::Deposit
                | TransactionType::WithdrawVoucher
                | TransactionType::CancelCronItem
                | TransactionType::ExchangeBasket
                | TransactionType::PayDividend
                | TransactionType::ProcessInbox
        )
    }

    pub fn is_cron_item(&self) -> bool {
        matches!(
            self,
            TransactionType::MarketOffer
                | TransactionType::PaymentPlan
                | TransactionType::SmartContract
        )
    }

    pub fn is_item_receipt(&self) -> bool {
        matches!(
            self,
            TransactionType::TransferReceipt
                | TransactionType::ChequeReceipt
                | TransactionType::VoucherReceipt
        )
    }

    pub fn is_cron_receipt(&self) -> bool {
        matches!(
            self,
            TransactionType::MarketReceipt | TransactionType::PaymentReceipt
        )
    }
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Payloads carried by a transaction or one of its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attachment {
    Instrument(Instrument),
    Offer(MarketOffer),
    BasketExchange(BasketExchange),
    Dividend(Dividend),
    Reply(Box<Reply>),
}

/// The part of a transaction kept in abbreviated box entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    pub transaction_type: TransactionType,
    pub number: TransactionNumber,
    /// Receipts: the request or cron item they were generated for.
    pub in_reference_to: TransactionNumber,
    /// Receipts: the number accepting this receipt closes.
    pub closing_number: Option<TransactionNumber>,
    pub amount: Amount,
    /// Reply notices: request number of the embedded reply.
    pub request_number: Option<RequestNumber>,
    /// Requests: the closing numbers drawn alongside the opening number.
    /// Blank and success notices: the numbers offered or confirmed.
    /// Notices: the numbers the notary burned.
    pub numbers: BTreeSet<TransactionNumber>,
    pub nym_id: NymId,
    pub account_id: Option<AccountId>,
    pub notary_id: NotaryId,
}

impl TransactionHeader {
    pub fn new(
        transaction_type: TransactionType,
        number: TransactionNumber,
        nym_id: NymId,
        account_id: Option<AccountId>,
        notary_id: NotaryId,
    ) -> Self {
        Self {
            transaction_type,
            number,
            in_reference_to: 0,
            closing_number: None,
            amount: 0,
            request_number: None,
            numbers: BTreeSet::new(),
            nym_id,
            account_id,
            notary_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub header: TransactionHeader,
    pub items: Vec<Item>,
    /// Request this transaction was generated for, when the notary embeds it.
    pub reference: Option<Box<Transaction>>,
    pub attachment: Option<Attachment>,
    pub certificate: Option<Certificate>,
}

impl Transaction {
    pub fn new(header: TransactionHeader) -> Self {
        Self {
            header,
            items: Vec::new(),
            reference: None,
            attachment: None,
            certificate: None,
        }
    }

    pub fn number(&self) -> TransactionNumber {
        self.header.number
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.header.transaction_type
    }

    pub fn item(&self, item_type: ItemType) -> Option<&Item> {
        self.items.iter().find(|item| item.item_type == item_type)
    }

    pub fn balance_statement(&self) -> Option<&Item> {
        self.items.iter().find(|item| item.item_type.is_statement())
    }

    /// The first item that is not a statement.
    pub fn action_item(&self) -> Option<&Item> {
        self.items.iter().find(|item| !item.item_type.is_statement())
    }

    /// Numbers this request holds: the opening number followed by its closing numbers.
    pub fn held_numbers(&self) -> Vec<TransactionNumber> {
        let mut numbers = vec![self.header.number];
        numbers.extend(self.header.numbers.iter().copied());
        numbers
    }

    /// Closing numbers a processInbox request schedules for closure.
    pub fn scheduled_closings(&self) -> BTreeSet<TransactionNumber> {
        self.items
            .iter()
            .filter(|item| item.item_type.is_acceptance())
            .flat_map(|item| item.numbers.iter().copied())
            .collect()
    }

    /// Number of the instrument an item receipt refers to, read from the embedded request.
    pub fn referenced_instrument_number(&self) -> Option<TransactionNumber> {
        let reference = self.reference.as_ref()?;
        match self.header.transaction_type {
            TransactionType::TransferReceipt => Some(reference.number()),
            TransactionType::ChequeReceipt | TransactionType::VoucherReceipt => reference
                .items
                .iter()
                .find_map(|item| match &item.attachment {
                    Some(Attachment::Instrument(instrument)) => instrument.number(),
                    _ => None,
                }),
            _ => None,
        }
    }

    pub fn instrument(&self) -> Option<&Instrument> {
        match &self.attachment {
            Some(Attachment::Instrument(instrument)) => Some(instrument),
            _ => None,
        }
    }

    pub fn embedded_reply(&self) -> Option<&Reply> {
        match &self.attachment {
            Some(Attachment::Reply(reply)) => Some(reply),
            _ => None,
        }
    }

    pub fn digest(&self) -> anyhow::Result<HashType> {
        HashType::of(self)
    }
}

impl Signable for Transaction {
    fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    fn set_certificate(&mut self, certificate: Option<Certificate>) {
        self.certificate = certificate;
    }
}
