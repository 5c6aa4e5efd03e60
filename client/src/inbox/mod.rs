//! Assembles processInbox requests from the caller's accept/reject decisions.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::agreement::{AgreementError, AgreementProposal, BalanceAgreementBuilder};
use crate::builder::{AccountView, PreparedTransaction};
use crate::context::ServerContext;
use crate::identifier::{Amount, TransactionNumber};
use crate::ledger::{Item, ItemType, LedgerError, Transaction, TransactionHeader, TransactionType};
use crate::message::{Message, MessagePayload, MessageType};
use crate::numbers::NumberError;
use crate::utilities::crypto::Signable;

#[derive(Error, Debug)]
pub enum InboxError {
    #[error("No receipts selected")]
    NoDecisions,
    #[error("Receipt {0} selected more than once")]
    DuplicateDecision(TransactionNumber),
    #[error("Receipt {0} is not in the inbox")]
    ReceiptNotFound(TransactionNumber),
    #[error("Receipt {0} has not been downloaded")]
    NotHydrated(TransactionNumber),
    #[error("Receipt {number} of type {transaction_type} can not be processed from an inbox")]
    NotProcessable {
        number: TransactionNumber,
        transaction_type: TransactionType,
    },
    #[error("Receipt {0} does not belong to this account and notary")]
    ForeignReceipt(TransactionNumber),
    #[error("Receipt {0} is not signed by the notary")]
    BadSignature(TransactionNumber),
    #[error("Receipt {0} does not agree with the request it embeds")]
    InconsistentReceipt(TransactionNumber),
    #[error("Receipt {receipt} closes number {closing}, which is not issued to this Nym")]
    UnverifiableClosingNumber {
        receipt: TransactionNumber,
        closing: TransactionNumber,
    },
    #[error("Final receipt for {opening} requires accepting receipts {missing:?} in the same batch")]
    FinalReceiptSiblingsMissing {
        opening: TransactionNumber,
        missing: Vec<TransactionNumber>,
    },
    #[error(transparent)]
    Numbers(#[from] NumberError),
    #[error(transparent)]
    Agreement(#[from] AgreementError),
    #[error("Failed to sign: {0}")]
    Signing(#[from] anyhow::Error),
}

impl From<LedgerError> for InboxError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::NotFound(number) => InboxError::ReceiptNotFound(number),
            LedgerError::NotHydrated(number) => InboxError::NotHydrated(number),
            other => InboxError::Signing(other.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Accept,
    /// Reject a pending transfer or dispute a receipt.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxDecision {
    pub number: TransactionNumber,
    pub kind: ResponseKind,
}

impl InboxDecision {
    pub fn accept(number: TransactionNumber) -> Self {
        Self {
            number,
            kind: ResponseKind::Accept,
        }
    }

    pub fn reject(number: TransactionNumber) -> Self {
        Self {
            number,
            kind: ResponseKind::Reject,
        }
    }
}

/// Item type answering a receipt of `receipt` type.
pub fn response_item_type(receipt: TransactionType, kind: ResponseKind) -> Option<ItemType> {
    use ResponseKind::*;
    use TransactionType::*;
    let item_type = match (receipt, kind) {
        (Pending, Accept) => ItemType::AcceptPending,
        (Pending, Reject) => ItemType::RejectPending,
        (TransferReceipt | ChequeReceipt | VoucherReceipt, Accept) => ItemType::AcceptItemReceipt,
        (TransferReceipt | ChequeReceipt | VoucherReceipt, Reject) => ItemType::DisputeItemReceipt,
        (MarketReceipt | PaymentReceipt, Accept) => ItemType::AcceptCronReceipt,
        (MarketReceipt | PaymentReceipt, Reject) => ItemType::DisputeCronReceipt,
        (FinalReceipt, Accept) => ItemType::AcceptFinalReceipt,
        (FinalReceipt, Reject) => ItemType::DisputeFinalReceipt,
        (BasketReceipt, Accept) => ItemType::AcceptBasketReceipt,
        (BasketReceipt, Reject) => ItemType::DisputeBasketReceipt,
        _ => return None,
    };
    Some(item_type)
}

/// Receipt types that a final receipt for the same cron item must be processed together with.
fn is_cron_sibling(header: &TransactionHeader) -> bool {
    matches!(
        header.transaction_type,
        TransactionType::MarketReceipt | TransactionType::PaymentReceipt | TransactionType::FinalReceipt
    )
}

#[derive(Debug)]
pub struct PreparedInbox {
    pub prepared: PreparedTransaction,
    pub closing_numbers: BTreeSet<TransactionNumber>,
    pub accepted: Vec<TransactionNumber>,
    pub processed: Vec<TransactionNumber>,
    pub net_amount: Amount,
}

pub struct ProcessInboxAssembler<'a> {
    context: &'a ServerContext,
    view: AccountView<'a>,
}

struct Response {
    item_type: ItemType,
    receipt_type: TransactionType,
    closing: Option<TransactionNumber>,
    amount: Amount,
}

impl<'a> ProcessInboxAssembler<'a> {
    pub fn new(context: &'a ServerContext, view: AccountView<'a>) -> Self {
        Self { context, view }
    }

    pub fn assemble(&self, decisions: &[InboxDecision]) -> Result<PreparedInbox, InboxError> {
        if decisions.is_empty() {
            return Err(InboxError::NoDecisions);
        }
        let mut selected = BTreeMap::new();
        for decision in decisions {
            if selected.insert(decision.number, decision.kind).is_some() {
                return Err(InboxError::DuplicateDecision(decision.number));
            }
        }

        let mut responses = BTreeMap::new();
        let mut closing_numbers = BTreeSet::new();
        for (number, kind) in &selected {
            let receipt = self.view.inbox.transaction(*number)?;
            self.verify_receipt(receipt)?;
            let receipt_type = receipt.transaction_type();
            let item_type = response_item_type(receipt_type, *kind).ok_or(
                InboxError::NotProcessable {
                    number: *number,
                    transaction_type: receipt_type,
                },
            )?;

            let closing = match kind {
                ResponseKind::Accept => self.closing_number(receipt)?,
                ResponseKind::Reject => None,
            };
            if let Some(closing) = closing {
                if !self.context.numbers().verify_issued_number(closing)
                    || !closing_numbers.insert(closing)
                {
                    return Err(InboxError::UnverifiableClosingNumber {
                        receipt: *number,
                        closing,
                    });
                }
            }
            let amount = match (receipt_type, kind) {
                (TransactionType::Pending, ResponseKind::Accept) => receipt.header.amount,
                _ => 0,
            };
            responses.insert(
                *number,
                Response {
                    item_type,
                    receipt_type,
                    closing,
                    amount,
                },
            );
        }
        self.check_final_receipts(&selected)?;

        let net_amount = responses
            .values()
            .try_fold(0 as Amount, |total, response| total.checked_add(response.amount))
            .ok_or(AgreementError::Overflow {
                balance: self.view.account.balance,
                delta: Amount::MAX,
            })?;

        let numbers = self
            .context
            .numbers()
            .reserve(1, MessageType::ProcessInbox)?;
        let wrapper = numbers[0].value();

        let mut transaction = Transaction::new(TransactionHeader::new(
            TransactionType::ProcessInbox,
            wrapper,
            self.context.nym_id().clone(),
            Some(self.view.account.id.clone()),
            self.context.notary_id().clone(),
        ));
        transaction.header.amount = net_amount;
        for (number, response) in &responses {
            let mut item = Item::new(response.item_type, Some(self.view.account.id.clone()))
                .with_amount(response.amount)
                .with_reference(*number);
            item.receipt_type = Some(response.receipt_type);
            item.numbers.extend(response.closing);
            transaction.items.push(item);
        }

        let proposal = AgreementProposal::new(wrapper, net_amount)
            .closing(closing_numbers.iter().copied().chain([wrapper]))
            .inbox_removals(selected.keys().copied());
        let statement = BalanceAgreementBuilder::new(
            self.context,
            self.view.account,
            self.view.inbox,
            self.view.outbox,
        )
        .build(&proposal)?;
        transaction.items.push(statement);
        transaction.sign(self.context.keypair())?;

        let accepted = selected
            .iter()
            .filter(|(_, kind)| **kind == ResponseKind::Accept)
            .map(|(number, _)| *number)
            .collect();
        log::debug!(
            "Prepared processInbox {wrapper} on {}: {} receipts, closing {:?}, net {net_amount}",
            self.view.account.id,
            selected.len(),
            closing_numbers
        );
        let message = Message::new(
            MessageType::ProcessInbox,
            self.context.nym_id().clone(),
            self.context.notary_id().clone(),
            MessagePayload::Transaction(Box::new(transaction)),
        );
        Ok(PreparedInbox {
            prepared: PreparedTransaction::new(message, numbers),
            closing_numbers,
            accepted,
            processed: selected.keys().copied().collect(),
            net_amount,
        })
    }

    fn verify_receipt(&self, receipt: &Transaction) -> Result<(), InboxError> {
        let header = &receipt.header;
        if header.account_id.as_ref() != Some(&self.view.account.id)
            || &header.notary_id != self.context.notary_id()
        {
            return Err(InboxError::ForeignReceipt(header.number));
        }
        if !self.context.verify_remote(receipt) {
            return Err(InboxError::BadSignature(header.number));
        }
        Ok(())
    }

    /// The number accepting `receipt` closes.
    fn closing_number(
        &self,
        receipt: &Transaction,
    ) -> Result<Option<TransactionNumber>, InboxError> {
        let header = &receipt.header;
        let closing = match header.transaction_type {
            t if t.is_item_receipt() => {
                match (receipt.referenced_instrument_number(), header.closing_number) {
                    (Some(referenced), Some(stated)) if referenced != stated => {
                        return Err(InboxError::InconsistentReceipt(header.number))
                    }
                    (Some(referenced), _) => referenced,
                    (None, Some(stated)) => stated,
                    (None, None) => header.in_reference_to,
                }
            }
            TransactionType::FinalReceipt | TransactionType::BasketReceipt => header
                .closing_number
                .ok_or(InboxError::InconsistentReceipt(header.number))?,
            _ => return Ok(None),
        };
        if closing <= 0 {
            return Err(InboxError::InconsistentReceipt(header.number));
        }
        Ok(Some(closing))
    }

    /// A final receipt may only be accepted together with every other receipt of its cron item.
    fn check_final_receipts(
        &self,
        selected: &BTreeMap<TransactionNumber, ResponseKind>,
    ) -> Result<(), InboxError> {
        let accepted =
            |number: &TransactionNumber| selected.get(number) == Some(&ResponseKind::Accept);
        for header in self.view.inbox.headers() {
            if header.transaction_type != TransactionType::FinalReceipt || !accepted(&header.number)
            {
                continue;
            }
            let opening = header.in_reference_to;
            let missing: Vec<_> = self
                .view
                .inbox
                .receipts_referencing(opening)
                .filter(|sibling| is_cron_sibling(sibling) && sibling.number != header.number)
                .map(|sibling| sibling.number)
                .filter(|number| !accepted(number))
                .collect();
            if !missing.is_empty() {
                log::warn!("Final receipt {} for {opening} is missing {missing:?}", header.number);
                return Err(InboxError::FinalReceiptSiblingsMissing { opening, missing });
            }
        }
        Ok(())
    }
}
