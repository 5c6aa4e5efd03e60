//! Applies notary replies to local state.
//!
//! The processor updates the number pool of its context directly and describes every change
//! to boxes and balances as a [LedgerEffect] for the caller to persist.

use serde::Serialize;
use thiserror::Error;

use crate::context::ServerContext;
use crate::identifier::{AccountId, Amount, NotaryId, NymId, RequestNumber, TransactionNumber};
use crate::ledger::{BoxType, Ledger, Transaction, TransactionType};
use crate::message::{Message, MessagePayload, MessageType, Reply, ReplyPayload};

mod flush;
pub mod harvest;
mod nymbox;

pub use flush::{FlushReport, SyncedNymbox};
pub use harvest::{harvest_unprocessed, Harvest};

#[derive(Error, Debug)]
pub enum ReplyError {
    #[error("Reply is for {nym} on {notary}, not this context")]
    WrongContext { nym: NymId, notary: NotaryId },
    #[error("Reply to request {actual} does not answer request {expected}")]
    RequestMismatch {
        expected: RequestNumber,
        actual: RequestNumber,
    },
    #[error("Reply to request {0} is not signed by the notary")]
    BadSignature(RequestNumber),
    #[error("Reply to request {0} is malformed")]
    Malformed(RequestNumber),
    #[error("The request answered by reply {0} is unknown")]
    MissingRequest(RequestNumber),
}

/// How far the notary got with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Rejected before any transaction processing.
    MessageFailure,
    BalanceFailure,
    TransactionFailure,
    Success,
}

/// A change to local boxes or balances implied by a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LedgerEffect {
    SetBalance {
        account_id: AccountId,
        balance: Amount,
    },
    RemoveReceipts {
        box_type: BoxType,
        account_id: Option<AccountId>,
        numbers: Vec<TransactionNumber>,
    },
    ReplaceAccount {
        account_id: AccountId,
        balance: Amount,
        inbox: Ledger,
        outbox: Ledger,
    },
    ReplaceNymbox(Ledger),
    Hydrate {
        box_type: BoxType,
        account_id: Option<AccountId>,
        receipt: Box<Transaction>,
    },
    /// Move the Nymbox entry with this number into the payments inbox.
    MoveToPaymentInbox(TransactionNumber),
}

#[derive(Debug)]
pub struct ReplyReport {
    pub request_number: RequestNumber,
    pub message_type: MessageType,
    pub outcome: ReplyOutcome,
    pub effects: Vec<LedgerEffect>,
    pub harvest: Harvest,
    pub synced: Option<SyncedNymbox>,
    /// The reply had been processed before and was skipped.
    pub duplicate: bool,
}

impl ReplyReport {
    fn new(reply: &Reply, outcome: ReplyOutcome) -> Self {
        Self {
            request_number: reply.request_number,
            message_type: reply.message_type,
            outcome,
            effects: Vec::new(),
            harvest: Harvest::default(),
            synced: None,
            duplicate: false,
        }
    }
}

/// Classifies a reply from its success flag and the statuses of the reply transaction.
pub fn classify(reply: &Reply) -> Result<ReplyOutcome, ReplyError> {
    if !reply.success {
        return Ok(ReplyOutcome::MessageFailure);
    }
    match reply.message_type {
        MessageType::NotarizeTransaction | MessageType::ProcessInbox | MessageType::ProcessNymbox => {
            let transaction = reply
                .transaction()
                .ok_or(ReplyError::Malformed(reply.request_number))?;
            let statement = transaction
                .balance_statement()
                .ok_or(ReplyError::Malformed(reply.request_number))?;
            if !statement.is_acknowledged() {
                return Ok(ReplyOutcome::BalanceFailure);
            }
            let actions_succeeded = transaction
                .items
                .iter()
                .filter(|item| !item.item_type.is_statement())
                .all(|item| item.is_acknowledged());
            Ok(if actions_succeeded {
                ReplyOutcome::Success
            } else {
                ReplyOutcome::TransactionFailure
            })
        }
        _ => Ok(ReplyOutcome::Success),
    }
}

pub struct ReplyProcessor<'a> {
    context: &'a mut ServerContext,
}

impl<'a> ReplyProcessor<'a> {
    pub fn new(context: &'a mut ServerContext) -> Self {
        Self { context }
    }

    /// Processes `reply`, the answer to `sent` if the original message is still known.
    pub fn process_reply(
        &mut self,
        sent: Option<&Message>,
        reply: &Reply,
    ) -> Result<ReplyReport, ReplyError> {
        self.check_reply(sent, reply)?;
        let outcome = classify(reply)?;
        let mut report = ReplyReport::new(reply, outcome);

        if self.context.verify_acknowledged_reply(reply.request_number) {
            log::debug!(
                "Reply to {} request {} already processed",
                reply.message_type,
                reply.request_number
            );
            report.duplicate = true;
            return Ok(report);
        }
        log::debug!(
            "Processing reply to {} request {}: {outcome:?}",
            reply.message_type,
            reply.request_number
        );

        match reply.message_type {
            MessageType::NotarizeTransaction | MessageType::ProcessInbox => {
                self.process_transaction_reply(sent, reply, &mut report)?
            }
            MessageType::ProcessNymbox => self.process_nymbox_reply(sent, reply, &mut report)?,
            MessageType::GetNymbox => {
                if let (ReplyOutcome::Success, ReplyPayload::Ledger(nymbox)) =
                    (outcome, &reply.payload)
                {
                    let hash = nymbox
                        .hash()
                        .map_err(|_| ReplyError::Malformed(reply.request_number))?;
                    self.context.set_nymbox_hash(hash);
                    report.effects.push(LedgerEffect::ReplaceNymbox(nymbox.clone()));
                    report.synced = Some(SyncedNymbox::new(nymbox.clone(), reply.request_number));
                }
            }
            MessageType::GetBoxReceipt => {
                if let (ReplyOutcome::Success, ReplyPayload::BoxReceipt(receipt)) =
                    (outcome, &reply.payload)
                {
                    let Some(MessagePayload::BoxReceipt {
                        box_type,
                        account_id,
                        ..
                    }) = sent.map(|message| &message.payload)
                    else {
                        return Err(ReplyError::MissingRequest(reply.request_number));
                    };
                    report.effects.push(LedgerEffect::Hydrate {
                        box_type: *box_type,
                        account_id: account_id.clone(),
                        receipt: receipt.clone(),
                    });
                }
            }
            MessageType::GetAccountData => {
                if let (
                    ReplyOutcome::Success,
                    ReplyPayload::AccountData {
                        balance,
                        inbox,
                        outbox,
                    },
                ) = (outcome, &reply.payload)
                {
                    let account_id = inbox
                        .account_id
                        .clone()
                        .ok_or(ReplyError::Malformed(reply.request_number))?;
                    report.effects.push(LedgerEffect::ReplaceAccount {
                        account_id,
                        balance: *balance,
                        inbox: inbox.clone(),
                        outbox: outbox.clone(),
                    });
                }
            }
            MessageType::GetRequestNumber => {
                if let (ReplyOutcome::Success, ReplyPayload::RequestNumber(number)) =
                    (outcome, &reply.payload)
                {
                    self.context.set_request_number(*number);
                }
            }
            MessageType::RegisterNym
            | MessageType::UnregisterNym
            | MessageType::GetTransactionNumbers
            | MessageType::IssueBasket => {}
        }

        self.context
            .remove_acknowledged_replies(reply.acknowledged_replies.iter().copied());
        if !reply.message_type.is_read_only() {
            self.context.add_acknowledged_reply(reply.request_number);
        }
        Ok(report)
    }

    fn check_reply(&self, sent: Option<&Message>, reply: &Reply) -> Result<(), ReplyError> {
        if &reply.nym_id != self.context.nym_id() || &reply.notary_id != self.context.notary_id() {
            return Err(ReplyError::WrongContext {
                nym: reply.nym_id.clone(),
                notary: reply.notary_id.clone(),
            });
        }
        if let Some(sent) = sent {
            if sent.request_number != reply.request_number || sent.message_type != reply.message_type
            {
                return Err(ReplyError::RequestMismatch {
                    expected: sent.request_number,
                    actual: reply.request_number,
                });
            }
        }
        if !self.context.verify_remote(reply) {
            return Err(ReplyError::BadSignature(reply.request_number));
        }
        Ok(())
    }

    /// The request a transaction reply answers: the sent message, or the copy the notary
    /// embedded in its reply.
    fn request<'r>(sent: Option<&'r Message>, reply: &'r Reply) -> Option<&'r Transaction> {
        sent.and_then(Message::transaction)
            .or_else(|| reply.transaction().and_then(|t| t.reference.as_deref()))
    }

    fn process_transaction_reply(
        &mut self,
        sent: Option<&Message>,
        reply: &Reply,
        report: &mut ReplyReport,
    ) -> Result<(), ReplyError> {
        let request =
            Self::request(sent, reply).ok_or(ReplyError::MissingRequest(reply.request_number))?;
        report.harvest = harvest::harvest_transaction(self.context.numbers(), request, report.outcome);

        if report.outcome != ReplyOutcome::Success {
            return Ok(());
        }
        if let Some(statement) = request.balance_statement() {
            if let Some(account_id) = &statement.account_id {
                report.effects.push(LedgerEffect::SetBalance {
                    account_id: account_id.clone(),
                    balance: statement.amount,
                });
            }
        }
        if request.transaction_type() == TransactionType::ProcessInbox {
            let numbers = request
                .items
                .iter()
                .filter(|item| !item.item_type.is_statement())
                .map(|item| item.in_reference_to)
                .collect();
            report.effects.push(LedgerEffect::RemoveReceipts {
                box_type: BoxType::Inbox,
                account_id: request.header.account_id.clone(),
                numbers,
            });
        }
        Ok(())
    }

    fn process_nymbox_reply(
        &mut self,
        sent: Option<&Message>,
        reply: &Reply,
        report: &mut ReplyReport,
    ) -> Result<(), ReplyError> {
        let request =
            Self::request(sent, reply).ok_or(ReplyError::MissingRequest(reply.request_number))?;
        if report.outcome != ReplyOutcome::Success {
            report.harvest = harvest::withdraw_tentative(self.context.numbers(), request);
            log::warn!(
                "processNymbox {} failed ({:?}), withdrew {:?}",
                reply.request_number,
                report.outcome,
                report.harvest.withdrawn
            );
            return Ok(());
        }
        let (harvest, effects) = nymbox::apply_processed_nymbox(self.context, request);
        report.harvest = harvest;
        report.effects.extend(effects);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::collections::BTreeSet;

    use assert_matches::assert_matches;

    use super::*;
    use crate::builder::{AccountView, TransactionBuilder};
    use crate::identifier::AccountId;
    use crate::ledger::{ItemStatus, Item, ItemType};
    use crate::testing::{account, account_box, context_with_numbers, usd};
    use crate::utilities::crypto::{Keypair, Signable};

    /// The notary's answer to `message`, with the given statement and action statuses.
    pub(crate) fn transaction_reply(message: &Message, balance_ok: bool, action_ok: bool) -> Reply {
        let request = message.transaction().expect("transaction message").clone();
        let mut answer = request.clone();
        if let Some(reply_type) = request.transaction_type().reply_type() {
            answer.header.transaction_type = reply_type;
        }
        let status = |ok: bool| {
            if ok {
                ItemStatus::Acknowledgement
            } else {
                ItemStatus::Rejection
            }
        };
        for item in answer.items.iter_mut() {
            item.status = if item.item_type.is_statement() {
                status(balance_ok)
            } else {
                status(action_ok)
            };
        }
        answer.reference = Some(Box::new(request));
        Reply::new(message, true, ReplyPayload::Transaction(Box::new(answer)))
    }

    fn sent_transfer(context: &mut ServerContext) -> Message {
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
        message
    }

    #[test]
    fn test_classification() {
        let mut context = context_with_numbers(&[10]);
        let message = sent_transfer(&mut context);

        assert_matches!(
            classify(&Reply::new(&message, false, ReplyPayload::None)),
            Ok(ReplyOutcome::MessageFailure)
        );
        assert_matches!(
            classify(&transaction_reply(&message, false, true)),
            Ok(ReplyOutcome::BalanceFailure)
        );
        assert_matches!(
            classify(&transaction_reply(&message, true, false)),
            Ok(ReplyOutcome::TransactionFailure)
        );
        assert_matches!(
            classify(&transaction_reply(&message, true, true)),
            Ok(ReplyOutcome::Success)
        );
        assert_matches!(
            classify(&Reply::new(&message, true, ReplyPayload::None)),
            Err(ReplyError::Malformed(_))
        );
    }

    #[test]
    fn test_transfer_success_keeps_number_and_sets_balance() {
        let mut context = context_with_numbers(&[10, 11]);
        let message = sent_transfer(&mut context);
        let reply = transaction_reply(&message, true, true);

        let report = ReplyProcessor::new(&mut context)
            .process_reply(Some(&message), &reply)
            .unwrap();

        assert_eq!(report.outcome, ReplyOutcome::Success);
        assert_eq!(
            report.effects,
            vec![LedgerEffect::SetBalance {
                account_id: usd(),
                balance: 70
            }]
        );
        assert!(context.numbers().verify_issued_number(10));
        assert!(!context.numbers().verify_available_number(10));
        assert!(context.verify_acknowledged_reply(message.request_number));
    }

    #[test]
    fn test_duplicate_reply_skipped() {
        let mut context = context_with_numbers(&[10]);
        let message = sent_transfer(&mut context);
        let reply = Reply::new(&message, false, ReplyPayload::None);

        let first = ReplyProcessor::new(&mut context)
            .process_reply(Some(&message), &reply)
            .unwrap();
        assert_eq!(first.harvest.recovered, vec![10]);

        let mut reuse = context
            .numbers()
            .next_transaction_number(MessageType::NotarizeTransaction);
        reuse.set_success(true);

        let second = ReplyProcessor::new(&mut context)
            .process_reply(Some(&message), &reply)
            .unwrap();
        assert!(second.duplicate);
        assert!(!context.numbers().verify_available_number(10));
    }

    #[test]
    fn test_reply_checks() {
        let mut context = context_with_numbers(&[10, 11]);
        let message = sent_transfer(&mut context);

        let mut foreign = transaction_reply(&message, true, true);
        foreign.nym_id = NymId::from("mallory");
        assert_matches!(
            ReplyProcessor::new(&mut context).process_reply(Some(&message), &foreign),
            Err(ReplyError::WrongContext { .. })
        );

        let mut other = transaction_reply(&message, true, true);
        other.request_number += 1;
        assert_matches!(
            ReplyProcessor::new(&mut context).process_reply(Some(&message), &other),
            Err(ReplyError::RequestMismatch { .. })
        );

        let notary = Keypair::generate();
        context.set_remote_public_key(notary.public_key());
        let unsigned = transaction_reply(&message, true, true);
        assert_matches!(
            ReplyProcessor::new(&mut context).process_reply(Some(&message), &unsigned),
            Err(ReplyError::BadSignature(_))
        );
        let mut signed = unsigned;
        signed.sign(&notary).unwrap();
        assert!(ReplyProcessor::new(&mut context)
            .process_reply(Some(&message), &signed)
            .is_ok());
    }

    #[test]
    fn test_embedded_request_used_without_sent_message() {
        let mut context = context_with_numbers(&[10]);
        let message = sent_transfer(&mut context);
        let reply = transaction_reply(&message, false, true);

        let report = ReplyProcessor::new(&mut context)
            .process_reply(None, &reply)
            .unwrap();
        assert_eq!(report.outcome, ReplyOutcome::BalanceFailure);
        assert!(context.numbers().verify_issued_number(10));
        assert!(!context.numbers().verify_available_number(10));
    }

    #[test]
    fn test_request_number_and_account_data() {
        let mut context = context_with_numbers(&[]);
        let builder_context = context_with_numbers(&[]);
        let builder = TransactionBuilder::new(&builder_context);
        let mut message = builder.get_request_number();
        message.nym_id = context.nym_id().clone();
        let reply = Reply::new(&message, true, ReplyPayload::RequestNumber(55));
        ReplyProcessor::new(&mut context)
            .process_reply(Some(&message), &reply)
            .unwrap();
        assert_eq!(context.request_number(), 55);

        let account = account(usd(), "USD", 0);
        let message = builder.get_account_data(&account).unwrap();
        let mut inbox = account_box(BoxType::Inbox, &usd());
        inbox
            .add(crate::testing::receipt(TransactionType::Pending, 7, 3, None, 9))
            .unwrap();
        let reply = Reply::new(
            &message,
            true,
            ReplyPayload::AccountData {
                balance: 500,
                inbox: inbox.clone(),
                outbox: account_box(BoxType::Outbox, &usd()),
            },
        );
        let report = ReplyProcessor::new(&mut context)
            .process_reply(Some(&message), &reply)
            .unwrap();
        assert_matches!(
            &report.effects[..],
            [LedgerEffect::ReplaceAccount { balance: 500, inbox: replaced, .. }] if replaced == &inbox
        );
    }

    #[test]
    fn test_process_inbox_success_removes_receipts() {
        let mut context = context_with_numbers(&[10, 40]);
        let mut request = crate::testing::receipt(TransactionType::ProcessInbox, 10, 0, None, 0);
        let mut accept = Item::new(ItemType::AcceptItemReceipt, Some(usd())).with_reference(201);
        accept.numbers = BTreeSet::from([40]);
        request.items.push(accept);
        request
            .items
            .push(Item::new(ItemType::BalanceStatement, Some(usd())).with_amount(90));
        let mut message = Message::new(
            MessageType::ProcessInbox,
            context.nym_id().clone(),
            context.notary_id().clone(),
            MessagePayload::Transaction(Box::new(request)),
        );
        message.stamp(&mut context).unwrap();

        let report = ReplyProcessor::new(&mut context)
            .process_reply(Some(&message), &transaction_reply(&message, true, true))
            .unwrap();

        assert_eq!(report.harvest.closed, vec![10, 40]);
        assert!(report.effects.contains(&LedgerEffect::RemoveReceipts {
            box_type: BoxType::Inbox,
            account_id: Some(usd()),
            numbers: vec![201],
        }));
        assert!(report.effects.contains(&LedgerEffect::SetBalance {
            account_id: usd(),
            balance: 90
        }));
    }
}
