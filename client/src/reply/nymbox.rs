//! Effects of a processNymbox request the notary accepted.

use crate::context::ServerContext;
use crate::ledger::{Attachment, BoxType, ItemType, Transaction, TransactionType};
use crate::reply::{Harvest, LedgerEffect};

pub(super) fn apply_processed_nymbox(
    context: &ServerContext,
    request: &Transaction,
) -> (Harvest, Vec<LedgerEffect>) {
    let numbers = context.numbers();
    let mut harvest = Harvest::default();
    let mut effects = Vec::new();
    let mut removed = Vec::new();

    for item in &request.items {
        if item.item_type.is_statement() {
            continue;
        }
        removed.push(item.in_reference_to);
        match (item.item_type, item.receipt_type) {
            (ItemType::AcceptNotice, Some(TransactionType::SuccessNotice)) => {
                for number in &item.numbers {
                    if numbers.confirm_tentative_number(*number) {
                        log::debug!("Transaction number {number} confirmed");
                    }
                }
            }
            (ItemType::AcceptNotice, Some(TransactionType::Notice)) => {
                for number in &item.numbers {
                    if numbers.close_issued_number(*number) {
                        harvest.closed.push(*number);
                    }
                }
                // Burned numbers only appear on a notice of failed activation.
                if item.numbers.is_empty() {
                    continue;
                }
                let Some(Attachment::Instrument(instrument)) = &item.attachment else {
                    continue;
                };
                if instrument.activated_by(context.nym_id()) {
                    // The activator harvested from its own reply.
                    continue;
                }
                for number in instrument.numbers_for(context.nym_id()).all() {
                    if item.numbers.contains(&number) {
                        continue;
                    }
                    if numbers.recover_available_number(number) {
                        harvest.recovered.push(number);
                    }
                }
                log::debug!(
                    "Activation noticed in {} failed, recovered {:?}",
                    item.in_reference_to,
                    harvest.recovered
                );
            }
            (ItemType::AcceptFinalReceipt, _) => {
                for number in &item.numbers {
                    if numbers.close_issued_number(*number) {
                        harvest.closed.push(*number);
                    }
                }
            }
            (ItemType::AcceptMessage, _) => {
                effects.push(LedgerEffect::MoveToPaymentInbox(item.in_reference_to))
            }
            _ => {}
        }
    }

    // Receipts moved to the payments inbox leave the Nymbox through that effect.
    let moved: Vec<_> = effects
        .iter()
        .filter_map(|effect| match effect {
            LedgerEffect::MoveToPaymentInbox(number) => Some(*number),
            _ => None,
        })
        .collect();
    removed.retain(|number| !moved.contains(number));
    if !removed.is_empty() {
        effects.push(LedgerEffect::RemoveReceipts {
            box_type: BoxType::Nymbox,
            account_id: None,
            numbers: removed,
        });
    }
    (harvest, effects)
}
