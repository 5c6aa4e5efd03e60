use crate::identifier::RequestNumber;
use crate::ledger::{BoxEntry, Ledger, LedgerError, Transaction, TransactionType};
use crate::message::MessageOutbuffer;
use crate::reply::{harvest, Harvest, ReplyProcessor, ReplyReport};

/// A Nymbox as downloaded by a successful getNymbox.
///
/// Only the reply processor hands these out, so flushing the outbuffer cannot happen on a
/// stale or partial Nymbox.
#[derive(Debug, Clone)]
pub struct SyncedNymbox {
    nymbox: Ledger,
    request_number: RequestNumber,
}

impl SyncedNymbox {
    pub(super) fn new(nymbox: Ledger, request_number: RequestNumber) -> Self {
        Self {
            nymbox,
            request_number,
        }
    }

    pub fn nymbox(&self) -> &Ledger {
        &self.nymbox
    }

    /// Request number of the getNymbox that produced this download.
    pub fn request_number(&self) -> RequestNumber {
        self.request_number
    }

    /// Abbreviated reply notices in the download, whose full receipts should be fetched
    /// before flushing.
    pub fn abbreviated_reply_notices(&self) -> Vec<crate::identifier::TransactionNumber> {
        self.nymbox
            .entries()
            .filter(|entry| {
                entry.is_abbreviated() && entry.header().transaction_type == TransactionType::ReplyNotice
            })
            .map(|entry| entry.header().number)
            .collect()
    }

    pub fn hydrate(&mut self, receipt: Transaction) -> Result<(), LedgerError> {
        self.nymbox.hydrate(receipt)
    }

    fn reply_notice(&self, request_number: RequestNumber) -> Option<&BoxEntry> {
        self.nymbox.entries().find(|entry| {
            let header = entry.header();
            header.transaction_type == TransactionType::ReplyNotice
                && header.request_number == Some(request_number)
        })
    }
}

#[derive(Debug, Default)]
pub struct FlushReport {
    /// Requests whose reply was found in the Nymbox.
    pub resolved: Vec<RequestNumber>,
    /// Requests the notary never processed. Their numbers were recovered.
    pub harvested: Vec<RequestNumber>,
    /// Requests left in the outbuffer: the reply notice is abbreviated or its reply was
    /// rejected.
    pub unresolved: Vec<RequestNumber>,
    pub harvest: Harvest,
    pub reports: Vec<ReplyReport>,
}

impl<'a> ReplyProcessor<'a> {
    /// Settles every message in the outbuffer that was sent before the Nymbox download.
    pub fn flush_sent_messages(
        &mut self,
        outbuffer: &mut MessageOutbuffer,
        synced: &SyncedNymbox,
    ) -> FlushReport {
        let notary = self.context.notary_id().clone();
        let nym = self.context.nym_id().clone();
        let mut report = FlushReport::default();

        for request_number in outbuffer.request_numbers(&notary, &nym) {
            if request_number >= synced.request_number {
                continue;
            }
            let Some(notice) = synced.reply_notice(request_number) else {
                for message in outbuffer.take(request_number, &notary, &nym) {
                    log::debug!(
                        "{} request {request_number} was never processed, harvesting",
                        message.message_type
                    );
                    report
                        .harvest
                        .merge(harvest::harvest_unprocessed(self.context, &message));
                }
                report.harvested.push(request_number);
                continue;
            };

            if self.context.verify_acknowledged_reply(request_number) {
                outbuffer.remove(request_number, &notary, &nym);
                report.resolved.push(request_number);
                continue;
            }
            let Some(reply) = notice.transaction().and_then(Transaction::embedded_reply) else {
                log::debug!("Reply notice for request {request_number} is abbreviated");
                report.unresolved.push(request_number);
                continue;
            };
            let sent = outbuffer.get(request_number, &notary, &nym);
            match self.process_reply(sent, reply) {
                Ok(processed) => {
                    report.harvest.merge(processed.harvest.clone());
                    report.reports.push(processed);
                    outbuffer.remove(request_number, &notary, &nym);
                    report.resolved.push(request_number);
                }
                Err(err) => {
                    log::error!("Reply notice for request {request_number} rejected: {err}");
                    report.unresolved.push(request_number);
                }
            }
        }
        log::debug!(
            "Flushed outbuffer for {nym} on {notary}: {} resolved, {} harvested, {} unresolved",
            report.resolved.len(),
            report.harvested.len(),
            report.unresolved.len()
        );
        report
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::{AccountView, TransactionBuilder};
    use crate::context::ServerContext;
    use crate::identifier::AccountId;
    use crate::ledger::{Attachment, BoxType};
    use crate::message::{Message, Reply, ReplyPayload};
    use crate::reply::test::transaction_reply;
    use crate::reply::ReplyOutcome;
    use crate::testing::{account, account_box, context_with_numbers, nym_box, nymbox_receipt, usd};

    fn send_transfer(context: &mut ServerContext, outbuffer: &mut MessageOutbuffer) -> Message {
        let account = account(usd(), "USD", 100);
        let inbox = account_box(BoxType::Inbox, &usd());
        let outbox = account_box(BoxType::Outbox, &usd());
        let mut message = TransactionBuilder::new(context)
            .transfer(
                AccountView::new(&account, &inbox, &outbox),
                &AccountId::from("bob-usd"),
                30,
                "",
            )
            .unwrap()
            .commit();
        message.stamp(context).unwrap();
        outbuffer.add(message.clone());
        message
    }

    fn synced(context: &mut ServerContext, notices: Vec<Transaction>) -> SyncedNymbox {
        let mut nymbox = nym_box(BoxType::Nymbox);
        for notice in notices {
            nymbox.add(notice).unwrap();
        }
        let mut request = TransactionBuilder::new(context).get_nymbox();
        request.stamp(context).unwrap();
        let reply = Reply::new(&request, true, ReplyPayload::Ledger(nymbox));
        ReplyProcessor::new(context)
            .process_reply(Some(&request), &reply)
            .unwrap()
            .synced
            .unwrap()
    }

    fn reply_notice(number: i64, reply: Reply) -> Transaction {
        let mut notice = nymbox_receipt(TransactionType::ReplyNotice, number, &[]);
        notice.header.request_number = Some(reply.request_number);
        notice.attachment = Some(Attachment::Reply(Box::new(reply)));
        notice
    }

    #[test]
    fn test_unanswered_message_is_harvested() {
        let mut context = context_with_numbers(&[10]);
        let mut outbuffer = MessageOutbuffer::new();
        send_transfer(&mut context, &mut outbuffer);
        assert!(!context.numbers().verify_available_number(10));

        let synced = synced(&mut context, vec![]);
        let report = ReplyProcessor::new(&mut context).flush_sent_messages(&mut outbuffer, &synced);

        assert_eq!(report.harvested.len(), 1);
        assert_eq!(report.harvest.recovered, vec![10]);
        assert!(context.numbers().verify_available_number(10));
        assert!(outbuffer.is_empty());
    }

    #[test]
    fn test_reply_notice_resolves_without_recovery() {
        let mut context = context_with_numbers(&[10]);
        let mut outbuffer = MessageOutbuffer::new();
        let message = send_transfer(&mut context, &mut outbuffer);

        let notice = reply_notice(300, transaction_reply(&message, true, true));
        let synced = synced(&mut context, vec![notice]);
        let report = ReplyProcessor::new(&mut context).flush_sent_messages(&mut outbuffer, &synced);

        assert_eq!(report.resolved, vec![message.request_number]);
        assert_eq!(report.reports[0].outcome, ReplyOutcome::Success);
        assert!(!context.numbers().verify_available_number(10));
        assert!(context.numbers().verify_issued_number(10));
        assert!(outbuffer.is_empty());
    }

    #[test]
    fn test_already_processed_reply_not_applied_twice() {
        let mut context = context_with_numbers(&[10]);
        let mut outbuffer = MessageOutbuffer::new();
        let message = send_transfer(&mut context, &mut outbuffer);
        let reply = Reply::new(&message, false, ReplyPayload::None);
        ReplyProcessor::new(&mut context)
            .process_reply(Some(&message), &reply)
            .unwrap();

        // The recovered number goes out again before the late notice shows up.
        let mut reused = context
            .numbers()
            .next_transaction_number(crate::message::MessageType::NotarizeTransaction);
        reused.set_success(true);

        let synced = synced(&mut context, vec![reply_notice(300, reply)]);
        let report = ReplyProcessor::new(&mut context).flush_sent_messages(&mut outbuffer, &synced);

        assert_eq!(report.resolved, vec![message.request_number]);
        assert!(report.reports.is_empty());
        assert!(!context.numbers().verify_available_number(10));
    }

    #[test]
    fn test_abbreviated_notice_and_later_requests_stay() {
        let mut context = context_with_numbers(&[10, 11]);
        let mut outbuffer = MessageOutbuffer::new();
        let first = send_transfer(&mut context, &mut outbuffer);

        let mut full = nym_box(BoxType::Nymbox);
        full.add(reply_notice(300, transaction_reply(&first, true, true)))
            .unwrap();
        let (nymbox, receipts) = full.abbreviate().unwrap();
        let mut request = TransactionBuilder::new(&context).get_nymbox();
        request.stamp(&mut context).unwrap();
        let reply = Reply::new(&request, true, ReplyPayload::Ledger(nymbox));
        let mut synced = ReplyProcessor::new(&mut context)
            .process_reply(Some(&request), &reply)
            .unwrap()
            .synced
            .unwrap();
        let second = send_transfer(&mut context, &mut outbuffer);

        assert_eq!(synced.abbreviated_reply_notices(), vec![300]);
        let report = ReplyProcessor::new(&mut context).flush_sent_messages(&mut outbuffer, &synced);
        assert_eq!(report.unresolved, vec![first.request_number]);
        assert!(outbuffer.get(second.request_number, &first.notary_id, &first.nym_id).is_some());
        assert_eq!(outbuffer.len(), 2);

        for receipt in receipts {
            synced.hydrate(receipt).unwrap();
        }
        let report = ReplyProcessor::new(&mut context).flush_sent_messages(&mut outbuffer, &synced);
        assert_eq!(report.resolved, vec![first.request_number]);
        assert_eq!(outbuffer.len(), 1);
    }
}
