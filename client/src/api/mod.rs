//! The client as applications use it: one [NotaryClient] holding the wallet, storage, sent
//! messages and one context per (Nym, notary) pair.
//!
//! Every operation on a pair runs under that pair's reentrant lock. The context is persisted
//! together with the pair's unanswered messages after every send, so a crash loses at most
//! the reply being processed; its request is restored into the outbuffer with the context and
//! settled by the next Nymbox download.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::builder::BuildError;
use crate::config::Configuration;
use crate::context::{ContextLocks, ServerContext};
use crate::identifier::{AccountId, NotaryId, NymId, TransactionNumber};
use crate::inbox::InboxError;
use crate::ledger::{BoxType, Ledger, LedgerError, Transaction};
use crate::message::{Message, MessageOutbuffer, SendOutcome, Transport, TransportError};
use crate::payments::PaymentError;
use crate::reply::{
    harvest_unprocessed, LedgerEffect, ReplyError, ReplyOutcome, ReplyProcessor, ReplyReport,
};
use crate::storage::{ClientStore, Storage, StorageError};
use crate::wallet::{Wallet, WalletError};

mod operations;
mod sync;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Inbox(#[from] InboxError),
    #[error(transparent)]
    Reply(#[from] ReplyError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Nym {nym} still has open transaction numbers on {notary}")]
    OpenNumbers { nym: NymId, notary: NotaryId },
    #[error("Nym {0} still owns accounts")]
    OwnsAccounts(NymId),
    #[error("Notary did not reply to {0}")]
    NoReply(String),
    #[error("Notary rejected {0}")]
    Rejected(String),
    #[error("Failed to sign: {0}")]
    Signing(#[from] anyhow::Error),
}

/// Result of sending a transaction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Success,
    Failure(ReplyOutcome),
    /// Sent without a reply. The request stays in the outbuffer until a Nymbox download
    /// shows whether the notary processed it.
    Unresolved,
}

impl From<ReplyOutcome> for TransactionOutcome {
    fn from(outcome: ReplyOutcome) -> Self {
        match outcome {
            ReplyOutcome::Success => TransactionOutcome::Success,
            failure => TransactionOutcome::Failure(failure),
        }
    }
}

type ContextKey = (NymId, NotaryId);
type ReceiptKey = (BoxType, String, TransactionNumber);

pub struct NotaryClient<T: Transport> {
    configuration: Configuration,
    transport: T,
    store: ClientStore,
    wallet: RwLock<Wallet>,
    contexts: Mutex<HashMap<ContextKey, Arc<Mutex<ServerContext>>>>,
    outbuffer: Mutex<MessageOutbuffer>,
    locks: ContextLocks,
    receipts: Mutex<LruCache<ReceiptKey, Transaction>>,
}

impl<T: Transport> NotaryClient<T> {
    /// Opens a client over `storage`, restoring the wallet if one was stored.
    pub fn open(
        configuration: Configuration,
        transport: T,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, ClientError> {
        let store = ClientStore::new(storage);
        let wallet = match store.load_wallet()? {
            Some(snapshot) => Wallet::from_snapshot(snapshot)?,
            None => Wallet::new(),
        };
        let cache_size = NonZeroUsize::new(configuration.client.receipt_cache_size)
            .unwrap_or(NonZeroUsize::MIN);
        log::info!(
            "Opened client {} with {} Nyms",
            configuration.client.name,
            wallet.nyms().count()
        );
        Ok(Self {
            configuration,
            transport,
            store,
            wallet: RwLock::new(wallet),
            contexts: Mutex::new(HashMap::new()),
            outbuffer: Mutex::new(MessageOutbuffer::new()),
            locks: ContextLocks::new(),
            receipts: Mutex::new(LruCache::new(cache_size)),
        })
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Runs `f` on the wallet and persists it afterwards.
    pub fn with_wallet<R, F>(&self, f: F) -> Result<R, ClientError>
    where
        F: FnOnce(&mut Wallet) -> Result<R, WalletError>,
    {
        let mut wallet = self.wallet.write();
        let result = f(&mut wallet)?;
        self.store.store_wallet(&wallet.snapshot()?)?;
        Ok(result)
    }

    pub fn wallet(&self) -> parking_lot::RwLockReadGuard<'_, Wallet> {
        self.wallet.read()
    }

    /// The context for the pair, loaded from storage or created on first use.
    pub fn context(
        &self,
        nym: &NymId,
        notary: &NotaryId,
    ) -> Result<Arc<Mutex<ServerContext>>, ClientError> {
        let mut contexts = self.contexts.lock();
        if let Some(context) = contexts.get(&(nym.clone(), notary.clone())) {
            return Ok(context.clone());
        }

        let wallet = self.wallet.read();
        let keypair = wallet.keypair(nym)?.clone();
        let notary_key = wallet.notary_key(notary)?.cloned();
        let mut context = match self.store.load_context(notary, nym)? {
            Some(snapshot) => ServerContext::from_snapshot(snapshot, keypair),
            None => {
                log::debug!("Creating context for {nym} on {notary}");
                ServerContext::new(nym.clone(), notary.clone(), keypair, notary_key.clone())
            }
        };
        if context.remote_public_key().is_none() {
            if let Some(key) = notary_key {
                context.set_remote_public_key(key);
            }
        }
        let sent = self.store.load_sent(notary, nym)?;
        if !sent.is_empty() {
            let mut outbuffer = self.outbuffer.lock();
            for message in sent {
                outbuffer.add(message);
            }
            log::info!(
                "Restored {} unanswered messages for {nym} on {notary}",
                outbuffer.len_for(notary, nym)
            );
        }
        let context = Arc::new(Mutex::new(context));
        contexts.insert((nym.clone(), notary.clone()), context.clone());
        Ok(context)
    }

    /// Whether the pair is running low on available transaction numbers.
    pub fn needs_transaction_numbers(
        &self,
        nym: &NymId,
        notary: &NotaryId,
    ) -> Result<bool, ClientError> {
        let context = self.context(nym, notary)?;
        let available = context.lock().numbers().available_count();
        Ok(available < self.configuration.numbers.low_water_mark)
    }

    /// Drops a Nym from the wallet. Refused while it owns accounts or any notary still holds
    /// open numbers for it.
    pub fn remove_nym(&self, nym: &NymId) -> Result<(), ClientError> {
        if self.wallet.read().accounts_for(nym).next().is_some() {
            return Err(ClientError::OwnsAccounts(nym.clone()));
        }
        let notaries: Vec<NotaryId> = self
            .contexts
            .lock()
            .keys()
            .filter(|(owner, _)| owner == nym)
            .map(|(_, notary)| notary.clone())
            .collect();
        for notary in &notaries {
            let context = self.context(nym, notary)?;
            if context.lock().has_open_numbers() {
                return Err(ClientError::OpenNumbers {
                    nym: nym.clone(),
                    notary: notary.clone(),
                });
            }
        }
        for notary in &notaries {
            let lock = self.locks.get(nym, notary);
            let _guard = lock.lock();
            let context = self.context(nym, notary)?;
            let context = context.lock();
            self.outbuffer.lock().clear(notary, nym, |message| {
                harvest_unprocessed(&context, message);
            });
            self.contexts.lock().remove(&(nym.clone(), notary.clone()));
            self.store.erase_context(notary, nym)?;
        }
        self.with_wallet(|wallet| {
            wallet
                .remove_nym(nym)
                .map(|_| ())
                .ok_or_else(|| WalletError::UnknownNym(nym.clone()))
        })?;
        log::info!("Removed Nym {nym}");
        Ok(())
    }

    /// Stores the context with the pair's unanswered messages.
    fn persist_context(&self, context: &ServerContext) -> Result<(), ClientError> {
        let sent = self
            .outbuffer
            .lock()
            .messages_for(context.notary_id(), context.nym_id());
        self.store.store_context(&context.snapshot(), &sent)?;
        Ok(())
    }

    /// Stamps and sends `message`, then processes the reply if one came back.
    ///
    /// `on_sent` runs once the transport reports the message left, before the reply is
    /// processed; it is where drawn numbers get committed. A message that was not sent gives
    /// its request number back.
    fn send<F>(
        &self,
        context: &mut ServerContext,
        mut message: Message,
        on_sent: F,
    ) -> Result<Option<ReplyReport>, ClientError>
    where
        F: FnOnce(),
    {
        message.stamp(context)?;
        let request_number = message.request_number;

        let outcome = match self.transport.send(&message) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("{} {request_number} not sent: {err}", message.message_type);
                context.set_request_number(request_number);
                return Err(err.into());
            }
        };
        on_sent();
        if !message.message_type.is_read_only() {
            self.outbuffer.lock().add(message.clone());
            self.persist_context(context)?;
        }

        let report = match outcome {
            SendOutcome::Replied(reply) => {
                let report = match ReplyProcessor::new(context).process_reply(Some(&message), &reply) {
                    Ok(report) => report,
                    Err(err) => {
                        log::error!(
                            "Unusable reply to {} {request_number}, leaving it for reconciliation: {err}",
                            message.message_type
                        );
                        self.persist_context(context)?;
                        return Err(err.into());
                    }
                };
                self.outbuffer
                    .lock()
                    .remove(request_number, &message.notary_id, &message.nym_id);
                self.apply_effects(context, &report.effects)?;
                Some(report)
            }
            SendOutcome::NoReply => {
                log::warn!(
                    "No reply to {} {request_number}, leaving it for reconciliation",
                    message.message_type
                );
                None
            }
        };
        self.persist_context(context)?;
        Ok(report)
    }

    /// Sends a message that must be answered successfully.
    fn request(
        &self,
        context: &mut ServerContext,
        message: Message,
    ) -> Result<ReplyReport, ClientError> {
        let description = format!("{}", message.message_type);
        match self.send(context, message, || {})? {
            Some(report) if report.outcome == ReplyOutcome::Success => Ok(report),
            Some(_) => Err(ClientError::Rejected(description)),
            None => Err(ClientError::NoReply(description)),
        }
    }

    fn owner_of(nym: &NymId, account: Option<&AccountId>) -> String {
        match account {
            Some(account) => account.to_string(),
            None => nym.to_string(),
        }
    }

    /// The stored box, or an empty one.
    fn load_box(
        &self,
        box_type: BoxType,
        nym: &NymId,
        notary: &NotaryId,
        account: Option<&AccountId>,
    ) -> Result<Ledger, ClientError> {
        let owner = Self::owner_of(nym, account);
        Ok(self
            .store
            .load_ledger(box_type, notary, &owner)?
            .unwrap_or_else(|| Ledger::new(box_type, nym.clone(), account.cloned(), notary.clone())))
    }

    /// Stores a freshly downloaded box, keeping receipts already downloaded for entries the
    /// new box still lists.
    fn replace_box(&self, mut downloaded: Ledger) -> Result<(), ClientError> {
        let previous = self.load_box(
            downloaded.box_type,
            &downloaded.nym_id,
            &downloaded.notary_id,
            downloaded.account_id.as_ref(),
        )?;
        for number in downloaded.abbreviated_numbers() {
            if let Ok(receipt) = previous.transaction(number) {
                if downloaded.hydrate(receipt.clone()).is_err() {
                    log::warn!("Stored receipt {number} no longer matches the notary's box");
                }
            }
        }
        let dropped: Vec<_> = previous
            .numbers()
            .into_iter()
            .filter(|number| !downloaded.contains(*number))
            .collect();
        self.store.store_ledger(&downloaded)?;
        self.store.erase_receipts(&downloaded, &dropped)?;
        Ok(())
    }

    fn apply_effects(
        &self,
        context: &ServerContext,
        effects: &[LedgerEffect],
    ) -> Result<(), ClientError> {
        let nym = context.nym_id();
        let notary = context.notary_id();
        for effect in effects {
            log::trace!("Applying {}", crate::logging::pretty_json(effect));
            match effect {
                LedgerEffect::SetBalance {
                    account_id,
                    balance,
                } => self.with_wallet(|wallet| {
                    wallet.account_mut(account_id)?.balance = *balance;
                    Ok(())
                })?,
                LedgerEffect::RemoveReceipts {
                    box_type,
                    account_id,
                    numbers,
                } => {
                    let mut ledger = self.load_box(*box_type, nym, notary, account_id.as_ref())?;
                    for number in numbers {
                        ledger.remove(*number);
                    }
                    self.store.store_ledger(&ledger)?;
                    self.store.erase_receipts(&ledger, numbers)?;
                }
                LedgerEffect::ReplaceAccount {
                    account_id,
                    balance,
                    inbox,
                    outbox,
                } => {
                    self.with_wallet(|wallet| {
                        wallet.account_mut(account_id)?.balance = *balance;
                        Ok(())
                    })?;
                    self.replace_box(inbox.clone())?;
                    self.replace_box(outbox.clone())?;
                }
                LedgerEffect::ReplaceNymbox(nymbox) => self.replace_box(nymbox.clone())?,
                LedgerEffect::Hydrate {
                    box_type,
                    account_id,
                    receipt,
                } => {
                    let mut ledger = self.load_box(*box_type, nym, notary, account_id.as_ref())?;
                    ledger.hydrate(receipt.as_ref().clone())?;
                    self.store.store_ledger(&ledger)?;
                    self.receipts.lock().put(
                        (*box_type, Self::owner_of(nym, account_id.as_ref()), receipt.number()),
                        receipt.as_ref().clone(),
                    );
                }
                LedgerEffect::MoveToPaymentInbox(number) => {
                    let mut nymbox = self.load_box(BoxType::Nymbox, nym, notary, None)?;
                    let Some(entry) = nymbox.remove(*number) else {
                        continue;
                    };
                    self.store.store_ledger(&nymbox)?;
                    self.store.erase_receipts(&nymbox, &[*number])?;
                    if let Some(transaction) = entry.transaction() {
                        let mut payments = self.load_box(BoxType::PaymentInbox, nym, notary, None)?;
                        payments.add(transaction.clone())?;
                        self.store.store_ledger(&payments)?;
                    }
                }
            }
        }
        Ok(())
    }
}
