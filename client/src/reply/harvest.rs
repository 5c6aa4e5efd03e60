//! What happens to the numbers a request held, once its fate is known.

use crate::context::ServerContext;
use crate::identifier::TransactionNumber;
use crate::ledger::{ItemType, Transaction, TransactionType};
use crate::message::{Message, MessageType};
use crate::numbers::NumberPool;
use crate::reply::ReplyOutcome;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Harvest {
    pub recovered: Vec<TransactionNumber>,
    pub closed: Vec<TransactionNumber>,
    /// Tentative claims withdrawn because the notary never processed the request.
    pub withdrawn: Vec<TransactionNumber>,
}

impl Harvest {
    fn recover(&mut self, numbers: &NumberPool, number: TransactionNumber) {
        if numbers.recover_available_number(number) {
            self.recovered.push(number);
        }
    }

    fn close(&mut self, numbers: &NumberPool, number: TransactionNumber) {
        if numbers.close_issued_number(number) {
            self.closed.push(number);
        }
    }

    pub(crate) fn merge(&mut self, other: Harvest) {
        self.recovered.extend(other.recovered);
        self.closed.extend(other.closed);
        self.withdrawn.extend(other.withdrawn);
    }
}

/// Applies the harvesting table to a notarizeTransaction or processInbox request.
///
/// | outcome | opening number | closing numbers |
/// |---|---|---|
/// | message failure | recovered | recovered |
/// | balance or transaction failure | burned | recovered |
/// | success | closed if the type closes on success | kept |
///
/// A processInbox request's closing numbers belong to receipts that stay in the inbox on
/// failure, so only its wrapper number is ever recovered.
pub fn harvest_transaction(
    numbers: &NumberPool,
    request: &Transaction,
    outcome: ReplyOutcome,
) -> Harvest {
    let mut harvest = Harvest::default();
    let opening = request.number();
    let closing = &request.header.numbers;

    if request.transaction_type() == TransactionType::ProcessInbox {
        match outcome {
            ReplyOutcome::MessageFailure => harvest.recover(numbers, opening),
            ReplyOutcome::BalanceFailure | ReplyOutcome::TransactionFailure => {
                log::warn!("processInbox {opening} failed, its number is burned")
            }
            ReplyOutcome::Success => {
                harvest.close(numbers, opening);
                for number in request.scheduled_closings() {
                    harvest.close(numbers, number);
                }
            }
        }
        return harvest;
    }

    match outcome {
        ReplyOutcome::MessageFailure => {
            harvest.recover(numbers, opening);
            for number in closing {
                harvest.recover(numbers, *number);
            }
        }
        ReplyOutcome::BalanceFailure | ReplyOutcome::TransactionFailure => {
            log::warn!(
                "{} {opening} failed ({outcome:?}), opening number is burned",
                request.transaction_type()
            );
            for number in closing {
                harvest.recover(numbers, *number);
            }
        }
        ReplyOutcome::Success => {
            if request.transaction_type().closes_on_success() {
                harvest.close(numbers, opening);
            }
        }
    }
    log::debug!(
        "Harvested {} {opening} after {outcome:?}: {harvest:?}",
        request.transaction_type()
    );
    harvest
}

/// Withdraws the tentative claims a processNymbox request made on blank numbers.
pub fn withdraw_tentative(numbers: &NumberPool, request: &Transaction) -> Harvest {
    let mut harvest = Harvest::default();
    for item in &request.items {
        if item.item_type != ItemType::AcceptTransaction {
            continue;
        }
        for number in &item.numbers {
            if numbers.remove_tentative_number(*number) {
                harvest.withdrawn.push(*number);
            }
        }
    }
    harvest
}

/// Recovers whatever a message held when the notary provably never processed it.
pub fn harvest_unprocessed(context: &ServerContext, message: &Message) -> Harvest {
    let Some(request) = message.transaction() else {
        return Harvest::default();
    };
    match message.message_type {
        MessageType::ProcessNymbox => withdraw_tentative(context.numbers(), request),
        MessageType::NotarizeTransaction | MessageType::ProcessInbox => {
            harvest_transaction(context.numbers(), request, ReplyOutcome::MessageFailure)
        }
        _ => Harvest::default(),
    }
}
