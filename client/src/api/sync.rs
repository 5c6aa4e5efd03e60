//! Keeping local state in step with the notary: request numbers, the Nymbox, account boxes
//! and the payment boxes.

use crate::api::{ClientError, NotaryClient, TransactionOutcome};
use crate::builder::{BuildError, TransactionBuilder};
use crate::context::ServerContext;
use crate::identifier::{AccountId, NotaryId, NymId, TransactionNumber};
use crate::inbox::{InboxDecision, ProcessInboxAssembler};
use crate::ledger::{BoxType, Ledger, Transaction};
use crate::message::{Message, Transport};
use crate::payments::{self, RecordedPayment};
use crate::reply::{FlushReport, LedgerEffect, ReplyProcessor, ReplyReport};

/// Rounds of download and process one synchronization runs at most. Processing blanks
/// makes the notary drop success notices, which take a second round.
const MAX_SYNC_ROUNDS: usize = 4;

impl<T: Transport> NotaryClient<T> {
    fn simple_request<F>(
        &self,
        nym: &NymId,
        notary: &NotaryId,
        build: F,
    ) -> Result<ReplyReport, ClientError>
    where
        F: FnOnce(&TransactionBuilder) -> Message,
    {
        let lock = self.locks.get(nym, notary);
        let _guard = lock.lock();
        let context = self.context(nym, notary)?;
        let mut context = context.lock();
        let message = build(&TransactionBuilder::new(&context));
        self.request(&mut context, message)
    }

    pub fn register_nym(&self, nym: &NymId, notary: &NotaryId) -> Result<ReplyReport, ClientError> {
        self.simple_request(nym, notary, |builder| builder.register_nym())
    }

    pub fn get_request_number(
        &self,
        nym: &NymId,
        notary: &NotaryId,
    ) -> Result<ReplyReport, ClientError> {
        self.simple_request(nym, notary, |builder| builder.get_request_number())
    }

    /// Asks for more numbers. They arrive later as blanks in the Nymbox.
    pub fn get_transaction_numbers(
        &self,
        nym: &NymId,
        notary: &NotaryId,
    ) -> Result<ReplyReport, ClientError> {
        self.simple_request(nym, notary, |builder| builder.get_transaction_numbers())
    }

    /// A box receipt from the cache, local storage, or the notary, in that order.
    fn box_receipt(
        &self,
        context: &mut ServerContext,
        box_type: BoxType,
        account: Option<&AccountId>,
        number: TransactionNumber,
    ) -> Result<Transaction, ClientError> {
        let key = (box_type, Self::owner_of(context.nym_id(), account), number);
        if let Some(receipt) = self.receipts.lock().get(&key).cloned() {
            return Ok(receipt);
        }
        let stored = self.load_box(box_type, context.nym_id(), context.notary_id(), account)?;
        if let Ok(receipt) = stored.transaction(number) {
            self.receipts.lock().put(key, receipt.clone());
            return Ok(receipt.clone());
        }

        let message = TransactionBuilder::new(context).get_box_receipt(box_type, account.cloned(), number);
        let report = self.request(context, message)?;
        report
            .effects
            .into_iter()
            .find_map(|effect| match effect {
                LedgerEffect::Hydrate { receipt, .. } => Some(*receipt),
                _ => None,
            })
            .ok_or_else(|| ClientError::Rejected(format!("getBoxReceipt {box_type} {number}")))
    }

    /// Downloads every receipt `ledger` only has abbreviated, then stores it.
    fn hydrate_box(&self, context: &mut ServerContext, ledger: &mut Ledger) -> Result<(), ClientError> {
        let abbreviated = ledger.abbreviated_numbers();
        if abbreviated.is_empty() {
            return Ok(());
        }
        let account = ledger.account_id.clone();
        for number in abbreviated {
            let receipt = self.box_receipt(context, ledger.box_type, account.as_ref(), number)?;
            ledger.hydrate(receipt)?;
        }
        self.store.store_ledger(ledger)?;
        Ok(())
    }

    /// Downloads the Nymbox and settles every sent message it answers.
    pub fn download_nymbox(&self, nym: &NymId, notary: &NotaryId) -> Result<FlushReport, ClientError> {
        let lock = self.locks.get(nym, notary);
        let _guard = lock.lock();
        let context = self.context(nym, notary)?;
        let mut context = context.lock();

        let message = TransactionBuilder::new(&context).get_nymbox();
        let report = self.request(&mut context, message)?;
        let mut synced = report
            .synced
            .ok_or_else(|| ClientError::Rejected("getNymbox".to_string()))?;
        for number in synced.abbreviated_reply_notices() {
            let receipt = self.box_receipt(&mut context, BoxType::Nymbox, None, number)?;
            synced.hydrate(receipt)?;
        }

        let flush = {
            let mut outbuffer = self.outbuffer.lock();
            ReplyProcessor::new(&mut context).flush_sent_messages(&mut outbuffer, &synced)
        };
        for report in &flush.reports {
            self.apply_effects(&context, &report.effects)?;
        }
        self.persist_context(&context)?;
        Ok(flush)
    }

    /// Accepts everything in the stored Nymbox. Returns None when there was nothing to
    /// accept.
    pub fn process_nymbox(
        &self,
        nym: &NymId,
        notary: &NotaryId,
    ) -> Result<Option<TransactionOutcome>, ClientError> {
        let lock = self.locks.get(nym, notary);
        let _guard = lock.lock();
        let context = self.context(nym, notary)?;
        let mut context = context.lock();

        let mut nymbox = self.load_box(BoxType::Nymbox, nym, notary, None)?;
        self.hydrate_box(&mut context, &mut nymbox)?;
        let prepared = match TransactionBuilder::new(&context).process_nymbox(&nymbox) {
            Ok(prepared) => prepared,
            Err(BuildError::EmptyNymbox) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let message = prepared.message().clone();
        let report = self.send(&mut context, message, move || {
            prepared.commit();
        })?;
        Ok(Some(report.map_or(TransactionOutcome::Unresolved, |report| {
            report.outcome.into()
        })))
    }

    /// Brings the pair up to date: request number, Nymbox and sent messages.
    pub fn synchronize(
        &self,
        nym: &NymId,
        notary: &NotaryId,
    ) -> Result<Vec<TransactionOutcome>, ClientError> {
        let lock = self.locks.get(nym, notary);
        let _guard = lock.lock();

        self.get_request_number(nym, notary)?;
        let mut outcomes = Vec::new();
        for _ in 0..MAX_SYNC_ROUNDS {
            self.download_nymbox(nym, notary)?;
            match self.process_nymbox(nym, notary)? {
                Some(TransactionOutcome::Success) => outcomes.push(TransactionOutcome::Success),
                Some(other) => {
                    outcomes.push(other);
                    break;
                }
                None => break,
            }
        }
        log::debug!("Synchronized {nym} on {notary}: {outcomes:?}");
        Ok(outcomes)
    }

    /// Replaces the local balance, inbox and outbox with the notary's and downloads the
    /// receipts the boxes list.
    pub fn download_account(&self, account_id: &AccountId) -> Result<(), ClientError> {
        let account = self.wallet.read().account(account_id)?.clone();
        let lock = self.locks.get(&account.nym_id, &account.notary_id);
        let _guard = lock.lock();
        let context = self.context(&account.nym_id, &account.notary_id)?;
        let mut context = context.lock();

        let message = TransactionBuilder::new(&context).get_account_data(&account)?;
        self.request(&mut context, message)?;
        for box_type in [BoxType::Inbox, BoxType::Outbox] {
            let mut ledger = self.load_box(
                box_type,
                &account.nym_id,
                &account.notary_id,
                Some(account_id),
            )?;
            self.hydrate_box(&mut context, &mut ledger)?;
        }
        Ok(())
    }

    /// Accepts or rejects inbox receipts. Receipts the decisions name are downloaded first
    /// if only their abbreviation is stored.
    pub fn process_inbox(
        &self,
        account_id: &AccountId,
        decisions: &[InboxDecision],
    ) -> Result<TransactionOutcome, ClientError> {
        let account = self.wallet.read().account(account_id)?.clone();
        let (nym, notary) = (account.nym_id.clone(), account.notary_id.clone());
        let lock = self.locks.get(&nym, &notary);
        let _guard = lock.lock();
        {
            let context = self.context(&nym, &notary)?;
            let mut context = context.lock();
            let mut inbox = self.load_box(BoxType::Inbox, &nym, &notary, Some(account_id))?;
            let mut hydrated = false;
            for decision in decisions {
                if inbox
                    .get(decision.number)
                    .map_or(false, |entry| entry.is_abbreviated())
                {
                    let receipt =
                        self.box_receipt(&mut context, BoxType::Inbox, Some(account_id), decision.number)?;
                    inbox.hydrate(receipt)?;
                    hydrated = true;
                }
            }
            if hydrated {
                self.store.store_ledger(&inbox)?;
            }
        }

        let loaded = self.load_account(account_id)?;
        let (outcome, _) = self.notarize(&nym, &notary, |context| {
            let assembled = ProcessInboxAssembler::new(context, loaded.view()).assemble(decisions)?;
            log::debug!(
                "Processing inbox of {account_id}: accepting {:?}, net {}",
                assembled.accepted,
                assembled.net_amount
            );
            Ok(assembled.prepared)
        })?;
        Ok(outcome)
    }

    /// Moves an instrument out of the payments inbox or outpayments into the record or
    /// expired box, recovering its numbers when that is provably safe.
    pub fn record_payment(
        &self,
        nym: &NymId,
        notary: &NotaryId,
        source: BoxType,
        number: TransactionNumber,
    ) -> Result<RecordedPayment, ClientError> {
        let lock = self.locks.get(nym, notary);
        let _guard = lock.lock();
        let context = self.context(nym, notary)?;
        let context = context.lock();

        let mut source_box = self.load_box(source, nym, notary, None)?;
        let recorded = payments::record_payment(&context, &mut source_box, number, |account| {
            self.store
                .load_ledger(BoxType::Inbox, notary, account.as_str())
                .map_err(anyhow::Error::from)
        })?;

        let mut destination = self.load_box(recorded.destination, nym, notary, None)?;
        destination.add(recorded.transaction.clone())?;
        self.store.store_ledger(&destination)?;
        self.store.store_ledger(&source_box)?;
        self.store.erase_receipts(&source_box, &[number])?;
        self.persist_context(&context)?;
        Ok(recorded)
    }
}
