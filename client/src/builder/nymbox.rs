use std::collections::BTreeSet;

use crate::agreement::transaction_statement;
use crate::builder::{BuildError, TransactionBuilder};
use crate::identifier::TransactionNumber;
use crate::ledger::{Attachment, BoxEntry, Item, ItemType, Ledger, Transaction, TransactionType};
use crate::message::{Message, MessagePayload, MessageType};
use crate::numbers::NumberPool;
use crate::utilities::crypto::Signable;

/// A processNymbox request. Holds no transaction numbers; accepting blanks only claims
/// numbers as tentative, and only once the message has left.
#[derive(Debug)]
pub struct PreparedNymbox {
    message: Message,
    claimed: BTreeSet<TransactionNumber>,
    pool: NumberPool,
}

impl PreparedNymbox {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub fn claimed(&self) -> &BTreeSet<TransactionNumber> {
        &self.claimed
    }

    pub fn commit(self) -> Message {
        for number in &self.claimed {
            self.pool.add_tentative_number(*number);
        }
        self.message
    }
}

impl<'a> TransactionBuilder<'a> {
    /// Accepts everything in the Nymbox that can be accepted.
    ///
    /// Instrument notices need their full receipt; abbreviated ones are left for a later round.
    pub fn process_nymbox(&self, nymbox: &Ledger) -> Result<PreparedNymbox, BuildError> {
        let numbers = self.context.numbers();
        let mut claimed = BTreeSet::new();
        let mut confirmed = BTreeSet::new();
        let mut closing = BTreeSet::new();
        let mut items = Vec::new();

        for entry in nymbox.entries() {
            let header = entry.header();
            let mut item = Item::new(ItemType::AcceptNotice, None).with_reference(header.number);
            item.receipt_type = Some(header.transaction_type);
            match header.transaction_type {
                TransactionType::Blank => {
                    item.item_type = ItemType::AcceptTransaction;
                    item.numbers = header
                        .numbers
                        .iter()
                        .copied()
                        .filter(|n| {
                            *n > 0 && !numbers.verify_issued_number(*n) && !numbers.verify_tentative_number(*n)
                        })
                        .collect();
                    claimed.extend(item.numbers.iter().copied());
                }
                TransactionType::SuccessNotice => {
                    item.numbers = header.numbers.clone();
                    confirmed.extend(
                        header
                            .numbers
                            .iter()
                            .copied()
                            .filter(|n| numbers.verify_tentative_number(*n)),
                    );
                }
                TransactionType::ReplyNotice => {}
                TransactionType::Notice => {
                    item.numbers = header.numbers.clone();
                    closing.extend(header.numbers.iter().copied());
                    if let Some(instrument) = entry.transaction().and_then(Transaction::instrument)
                    {
                        item.attachment = Some(Attachment::Instrument(
                            instrument.clone(),
                        ));
                    }
                }
                TransactionType::FinalReceipt => {
                    item.item_type = ItemType::AcceptFinalReceipt;
                    item.numbers.insert(header.in_reference_to);
                    closing.insert(header.in_reference_to);
                }
                TransactionType::InstrumentNotice | TransactionType::Message => {
                    item.item_type = ItemType::AcceptMessage;
                    match entry {
                        BoxEntry::Full(transaction) => item.attachment = transaction.attachment.clone(),
                        BoxEntry::Abbreviated(_) => {
                            log::debug!(
                                "Leaving abbreviated {} {} for a later round",
                                header.transaction_type,
                                header.number
                            );
                            continue;
                        }
                    }
                }
                other => {
                    log::warn!("Unexpected {other} {} in Nymbox", header.number);
                    continue;
                }
            }
            items.push(item);
        }

        if items.is_empty() {
            return Err(BuildError::EmptyNymbox);
        }

        let adding: BTreeSet<_> = claimed.union(&confirmed).copied().collect();
        let statement = transaction_statement(self.context, 0, &adding, &closing)?;

        let mut transaction = Transaction::new(self.header(TransactionType::ProcessNymbox, 0, None));
        transaction.items = items;
        transaction.items.push(statement);
        transaction.sign(self.context.keypair())?;

        log::debug!(
            "Prepared processNymbox for {} receipts, claiming {:?}",
            transaction.items.len() - 1,
            claimed
        );
        let message = self.message(
            MessageType::ProcessNymbox,
            MessagePayload::Transaction(Box::new(transaction)),
        );
        Ok(PreparedNymbox {
            message,
            claimed,
            pool: numbers.clone(),
        })
    }
}
