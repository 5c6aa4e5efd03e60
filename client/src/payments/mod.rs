//! Retiring instruments from the payments inbox and outpayments box.

use thiserror::Error;

use crate::context::ServerContext;
use crate::identifier::{AccountId, TransactionNumber};
use crate::instrument::HeldNumbers;
use crate::ledger::{BoxEntry, BoxType, Ledger, LedgerError, Transaction, TransactionType};
use crate::reply::Harvest;
use crate::utilities::time::ClientTime;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Payments can only be recorded from the payments inbox or outpayments, not {0}")]
    WrongBox(BoxType),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Failed to load account inbox: {0}")]
    Inbox(#[from] anyhow::Error),
}

#[derive(Debug)]
pub struct RecordedPayment {
    /// The record box, or the expired box for an expired instrument.
    pub destination: BoxType,
    pub transaction: Transaction,
    pub harvest: Harvest,
}

/// Receipts proving the notary already acted on an instrument.
fn proves_negotiation(transaction_type: TransactionType) -> bool {
    matches!(
        transaction_type,
        TransactionType::ChequeReceipt
            | TransactionType::VoucherReceipt
            | TransactionType::PaymentReceipt
            | TransactionType::FinalReceipt
    )
}

/// Moves entry `number` out of `source` and decides whether its numbers can be reused.
///
/// `account_inbox` loads the local inbox of an asset account the Nym drew numbers for. The
/// numbers are only recovered when none of those inboxes holds a receipt referencing them,
/// and never for an outgoing instrument that can still be negotiated.
pub fn record_payment<F>(
    context: &ServerContext,
    source: &mut Ledger,
    number: TransactionNumber,
    mut account_inbox: F,
) -> Result<RecordedPayment, PaymentError>
where
    F: FnMut(&AccountId) -> anyhow::Result<Option<Ledger>>,
{
    if !matches!(source.box_type, BoxType::PaymentInbox | BoxType::Outpayments) {
        return Err(PaymentError::WrongBox(source.box_type));
    }
    // Check before removing so a failed load leaves the box untouched.
    let transaction = source.transaction(number)?.clone();

    let now = ClientTime::now();
    let instrument = transaction.instrument();
    let expired = instrument.map_or(false, |instrument| instrument.is_expired(now));
    let destination = if expired {
        BoxType::ExpiredBox
    } else {
        BoxType::RecordBox
    };

    let mut harvest = Harvest::default();
    if let Some(instrument) = instrument {
        let held = instrument.numbers_for(context.nym_id());
        let negotiable = source.box_type == BoxType::Outpayments && !expired;
        if held.is_empty() {
            log::trace!("No numbers of ours on payment {number}");
        } else if negotiable {
            log::debug!("Outgoing payment {number} can still be negotiated, keeping its numbers");
        } else if negotiated(&held, &mut account_inbox)? {
            log::warn!("Payment {number} has receipts in the inbox, not harvesting its numbers");
        } else {
            for held_number in held.all() {
                if context.numbers().recover_available_number(held_number) {
                    harvest.recovered.push(held_number);
                }
            }
        }
    }

    let removed = source.remove(number);
    debug_assert!(matches!(removed, Some(BoxEntry::Full(_))));
    log::debug!(
        "Recorded payment {number} from {} into {destination}, recovered {:?}",
        source.box_type,
        harvest.recovered
    );
    Ok(RecordedPayment {
        destination,
        transaction,
        harvest,
    })
}

fn negotiated<F>(held: &HeldNumbers, account_inbox: &mut F) -> anyhow::Result<bool>
where
    F: FnMut(&AccountId) -> anyhow::Result<Option<Ledger>>,
{
    let numbers = held.all();
    for account in &held.accounts {
        let Some(inbox) = account_inbox(account)? else {
            continue;
        };
        let found = inbox.headers().any(|header| {
            proves_negotiation(header.transaction_type)
                && (numbers.contains(&header.in_reference_to)
                    || header
                        .closing_number
                        .map_or(false, |closing| numbers.contains(&closing)))
        });
        if found {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use chrono::Duration;

    use super::*;
    use crate::instrument::Instrument;
    use crate::ledger::Attachment;
    use crate::message::MessageType;
    use crate::testing::{account_box, cheque, context_with_numbers, nym_box, nymbox_receipt, receipt};
    use crate::utilities::crypto::Keypair;

    fn outpayment(context: &ServerContext, expired: bool) -> (Ledger, AccountId) {
        let mut cheque = cheque(&Keypair::generate(), 12, 50);
        cheque.sender_nym = context.nym_id().clone();
        if expired {
            cheque.valid_to = ClientTime::now() - Duration::hours(1);
        }
        let account = cheque.sender_account.clone();
        let mut entry = nymbox_receipt(TransactionType::InstrumentNotice, 300, &[]);
        entry.attachment = Some(Attachment::Instrument(Instrument::Cheque(cheque)));
        let mut outpayments = nym_box(BoxType::Outpayments);
        outpayments.add(entry).unwrap();
        (outpayments, account)
    }

    fn drawn(numbers: &[TransactionNumber]) -> ServerContext {
        let context = context_with_numbers(numbers);
        context
            .numbers()
            .reserve(numbers.len(), MessageType::NotarizeTransaction)
            .unwrap()
            .iter_mut()
            .for_each(|number| number.set_success(true));
        context
    }

    #[test]
    fn test_expired_cheque_numbers_recovered() {
        let context = drawn(&[12]);
        let (mut outpayments, _) = outpayment(&context, true);

        let recorded = record_payment(&context, &mut outpayments, 300, |_| Ok(None)).unwrap();
        assert_eq!(recorded.destination, BoxType::ExpiredBox);
        assert_eq!(recorded.harvest.recovered, vec![12]);
        assert!(outpayments.is_empty());
    }

    #[test]
    fn test_cheque_receipt_in_inbox_blocks_harvest() {
        let context = drawn(&[12]);
        let (mut outpayments, account) = outpayment(&context, true);
        let mut inbox = account_box(BoxType::Inbox, &account);
        inbox
            .add(receipt(TransactionType::ChequeReceipt, 400, 77, Some(12), 50))
            .unwrap();

        let recorded = record_payment(&context, &mut outpayments, 300, |loading| {
            Ok((loading == &account).then(|| inbox.clone()))
        })
        .unwrap();
        assert!(recorded.harvest.recovered.is_empty());
        assert!(!context.numbers().verify_available_number(12));
        assert!(context.numbers().verify_issued_number(12));
    }

    #[test]
    fn test_live_outgoing_cheque_keeps_numbers() {
        let context = drawn(&[12]);
        let (mut outpayments, _) = outpayment(&context, false);

        let recorded = record_payment(&context, &mut outpayments, 300, |_| Ok(None)).unwrap();
        assert_eq!(recorded.destination, BoxType::RecordBox);
        assert!(recorded.harvest.recovered.is_empty());
    }

    #[test]
    fn test_errors_leave_box_untouched() {
        let context = drawn(&[12]);
        let (mut outpayments, _) = outpayment(&context, true);

        assert_matches!(
            record_payment(&context, &mut outpayments, 999, |_| Ok(None)),
            Err(PaymentError::Ledger(LedgerError::NotFound(999)))
        );
        assert_matches!(
            record_payment(&context, &mut outpayments, 300, |_| Err(anyhow::anyhow!("disk"))),
            Err(PaymentError::Inbox(_))
        );
        assert!(outpayments.contains(300));
        assert!(!context.numbers().verify_available_number(12));

        let mut nymbox = nym_box(BoxType::Nymbox);
        assert_matches!(
            record_payment(&context, &mut nymbox, 300, |_| Ok(None)),
            Err(PaymentError::WrongBox(BoxType::Nymbox))
        );
    }
}
