//! Persistence of boxes, box receipts, contexts and the wallet.
//!
//! Everything is kept as JSON blobs under path-like keys. Boxes are stored abbreviated and
//! their full receipts under separate keys next to them, so a box can be loaded without its
//! receipts and hydrated on demand.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use thiserror::Error;

use crate::context::ContextSnapshot;
use crate::identifier::{NotaryId, NymId, TransactionNumber};
use crate::ledger::{BoxType, Ledger, LedgerError, Transaction};
use crate::message::Message;
use crate::utilities::encoding;
use crate::utilities::hash::HashType;
use crate::wallet::WalletSnapshot;

pub mod memory;
#[cfg(feature = "sqlite_storage")]
pub mod sqlite;

pub use memory::MemoryStorage;
#[cfg(feature = "sqlite_storage")]
pub use sqlite::SqliteStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
    #[error("Stored value under '{key}' is unreadable: {reason}")]
    Corrupted { key: String, reason: String },
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Key/value backend.
pub trait Storage: Send + Sync {
    fn load(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    fn store(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;

    /// Stores all entries atomically: either every entry is written or none is.
    fn store_batch(&self, entries: &[(String, Vec<u8>)]) -> anyhow::Result<()>;

    /// Returns false if there was nothing under `key`.
    fn erase(&self, key: &str) -> anyhow::Result<bool>;

    /// Hash chaining every batch written so far.
    fn root_hash(&self) -> anyhow::Result<Option<HashType>>;
}

/// Next root hash after writing `entries` on top of `previous`.
pub(crate) fn chain_root_hash(previous: Option<HashType>, entries: &[(String, Vec<u8>)]) -> HashType {
    let mut data = previous.map(|hash| hash.inner().to_vec()).unwrap_or_default();
    for (key, value) in entries {
        data.extend_from_slice(key.as_bytes());
        data.extend_from_slice(&HashType::digest(value).inner());
    }
    HashType::digest(&data)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// `<box>/<NotaryID>/<owner>`, the owner being the account for account boxes and the
    /// Nym otherwise.
    Box {
        box_type: BoxType,
        notary: NotaryId,
        owner: String,
    },
    /// `<box>/<NotaryID>/<owner>.r/<number>.rct`
    BoxReceipt {
        box_type: BoxType,
        notary: NotaryId,
        owner: String,
        number: TransactionNumber,
    },
    /// `contexts/<NotaryID>/<NymID>`
    Context { notary: NotaryId, nym: NymId },
    /// `sent/<NotaryID>/<NymID>`, the pair's messages still waiting for a reply.
    Sent { notary: NotaryId, nym: NymId },
    Wallet,
}

impl StorageKey {
    pub fn for_ledger(ledger: &Ledger) -> Self {
        StorageKey::Box {
            box_type: ledger.box_type,
            notary: ledger.notary_id.clone(),
            owner: Self::owner(ledger),
        }
    }

    pub fn for_receipt(ledger: &Ledger, number: TransactionNumber) -> Self {
        StorageKey::BoxReceipt {
            box_type: ledger.box_type,
            notary: ledger.notary_id.clone(),
            owner: Self::owner(ledger),
            number,
        }
    }

    fn owner(ledger: &Ledger) -> String {
        match &ledger.account_id {
            Some(account) => account.to_string(),
            None => ledger.nym_id.to_string(),
        }
    }
}

impl Display for StorageKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKey::Box {
                box_type,
                notary,
                owner,
            } => write!(f, "{box_type}/{notary}/{owner}"),
            StorageKey::BoxReceipt {
                box_type,
                notary,
                owner,
                number,
            } => write!(f, "{box_type}/{notary}/{owner}.r/{number}.rct"),
            StorageKey::Context { notary, nym } => write!(f, "contexts/{notary}/{nym}"),
            StorageKey::Sent { notary, nym } => write!(f, "sent/{notary}/{nym}"),
            StorageKey::Wallet => write!(f, "wallet"),
        }
    }
}

/// Typed access to a [Storage] backend.
#[derive(Clone)]
pub struct ClientStore {
    storage: Arc<dyn Storage>,
}

impl ClientStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn load_value<T: serde::de::DeserializeOwned>(
        &self,
        key: &StorageKey,
    ) -> Result<Option<T>, StorageError> {
        let key = key.to_string();
        match self.storage.load(&key)? {
            Some(bytes) => encoding::decode(&bytes)
                .map(Some)
                .map_err(|err| StorageError::Corrupted {
                    key,
                    reason: err.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Loads a box, hydrating every entry whose receipt is stored locally.
    pub fn load_ledger(
        &self,
        box_type: BoxType,
        notary: &NotaryId,
        owner: &str,
    ) -> Result<Option<Ledger>, StorageError> {
        let key = StorageKey::Box {
            box_type,
            notary: notary.clone(),
            owner: owner.to_string(),
        };
        let Some(mut ledger) = self.load_value::<Ledger>(&key)? else {
            return Ok(None);
        };
        for number in ledger.abbreviated_numbers() {
            if let Some(receipt) = self.load_receipt(&ledger, number)? {
                ledger.hydrate(receipt)?;
            }
        }
        log::trace!("Loaded {key} with {} entries", ledger.len());
        Ok(Some(ledger))
    }

    pub fn load_receipt(
        &self,
        ledger: &Ledger,
        number: TransactionNumber,
    ) -> Result<Option<Transaction>, StorageError> {
        self.load_value(&StorageKey::for_receipt(ledger, number))
    }

    /// Writes the abbreviated box and its full receipts in one batch.
    ///
    /// Receipts of entries that left the box are not erased here; see [Self::erase_receipts].
    pub fn store_ledger(&self, ledger: &Ledger) -> Result<(), StorageError> {
        let (abbreviated, receipts) = ledger.abbreviate()?;
        let mut batch = Vec::with_capacity(receipts.len() + 1);
        batch.push((
            StorageKey::for_ledger(ledger).to_string(),
            encoding::encode(&abbreviated)?,
        ));
        for receipt in &receipts {
            batch.push((
                StorageKey::for_receipt(ledger, receipt.number()).to_string(),
                encoding::encode(receipt)?,
            ));
        }
        log::debug!(
            "Storing {} with {} entries, {} receipts",
            StorageKey::for_ledger(ledger),
            ledger.len(),
            receipts.len()
        );
        self.storage.store_batch(&batch)?;
        Ok(())
    }

    pub fn erase_receipts(
        &self,
        ledger: &Ledger,
        numbers: &[TransactionNumber],
    ) -> Result<(), StorageError> {
        for number in numbers {
            self.storage
                .erase(&StorageKey::for_receipt(ledger, *number).to_string())?;
        }
        Ok(())
    }

    pub fn load_context(
        &self,
        notary: &NotaryId,
        nym: &NymId,
    ) -> Result<Option<ContextSnapshot>, StorageError> {
        self.load_value(&StorageKey::Context {
            notary: notary.clone(),
            nym: nym.clone(),
        })
    }

    /// Writes the context together with the messages it still waits on, in one batch, so
    /// numbers committed by a send are never stored without the message that spent them.
    pub fn store_context(
        &self,
        snapshot: &ContextSnapshot,
        sent: &[Message],
    ) -> Result<(), StorageError> {
        let context_key = StorageKey::Context {
            notary: snapshot.notary_id.clone(),
            nym: snapshot.nym_id.clone(),
        };
        let sent_key = StorageKey::Sent {
            notary: snapshot.notary_id.clone(),
            nym: snapshot.nym_id.clone(),
        };
        let batch = vec![
            (context_key.to_string(), encoding::encode(snapshot)?),
            (sent_key.to_string(), encoding::encode(&sent)?),
        ];
        log::trace!("Storing {context_key} with {} sent messages", sent.len());
        self.storage.store_batch(&batch)?;
        Ok(())
    }

    pub fn load_sent(&self, notary: &NotaryId, nym: &NymId) -> Result<Vec<Message>, StorageError> {
        Ok(self
            .load_value(&StorageKey::Sent {
                notary: notary.clone(),
                nym: nym.clone(),
            })?
            .unwrap_or_default())
    }

    /// Erases the context and its sent messages. Returns false if there was no context.
    pub fn erase_context(&self, notary: &NotaryId, nym: &NymId) -> Result<bool, StorageError> {
        let key = StorageKey::Context {
            notary: notary.clone(),
            nym: nym.clone(),
        };
        self.storage.erase(
            &StorageKey::Sent {
                notary: notary.clone(),
                nym: nym.clone(),
            }
            .to_string(),
        )?;
        Ok(self.storage.erase(&key.to_string())?)
    }

    pub fn load_wallet(&self) -> Result<Option<WalletSnapshot>, StorageError> {
        self.load_value(&StorageKey::Wallet)
    }

    pub fn store_wallet(&self, snapshot: &WalletSnapshot) -> Result<(), StorageError> {
        self.storage
            .store(&StorageKey::Wallet.to_string(), &encoding::encode(snapshot)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::identifier::AccountId;
    use crate::ledger::TransactionType;
    use crate::message::{MessagePayload, MessageType};
    use crate::testing::{account_box, alice, context_with_numbers, notary, receipt, usd};

    fn store() -> ClientStore {
        ClientStore::new(Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn test_key_layout() {
        let inbox = account_box(BoxType::Inbox, &AccountId::from("acct"));
        assert_eq!(StorageKey::for_ledger(&inbox).to_string(), "inbox/notary/acct");
        assert_eq!(
            StorageKey::for_receipt(&inbox, 7).to_string(),
            "inbox/notary/acct.r/7.rct"
        );
        assert_eq!(
            StorageKey::Context {
                notary: notary(),
                nym: NymId::from("alice")
            }
            .to_string(),
            "contexts/notary/alice"
        );
    }

    #[test]
    fn test_ledger_stored_abbreviated_and_rehydrated() {
        let store = store();
        let mut inbox = account_box(BoxType::Inbox, &usd());
        inbox
            .add(receipt(TransactionType::Pending, 7, 3, None, 25))
            .unwrap();
        inbox
            .add(receipt(TransactionType::ChequeReceipt, 8, 4, Some(12), 10))
            .unwrap();
        store.store_ledger(&inbox).unwrap();

        let loaded = store
            .load_ledger(BoxType::Inbox, &notary(), usd().as_str())
            .unwrap()
            .unwrap();
        assert_eq!(loaded, inbox);

        store.erase_receipts(&inbox, &[8]).unwrap();
        let loaded = store
            .load_ledger(BoxType::Inbox, &notary(), usd().as_str())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.abbreviated_numbers(), vec![8]);
    }

    #[test]
    fn test_context_stored_with_sent_messages() {
        let store = store();
        let context = context_with_numbers(&[10, 11]);
        let mut sent = Message::new(
            MessageType::GetTransactionNumbers,
            alice(),
            notary(),
            MessagePayload::None,
        );
        sent.request_number = 4;
        store.store_context(&context.snapshot(), &[sent.clone()]).unwrap();

        assert_eq!(
            store.load_context(&notary(), &alice()).unwrap(),
            Some(context.snapshot())
        );
        assert_eq!(store.load_sent(&notary(), &alice()).unwrap(), vec![sent]);
        assert!(store.load_sent(&notary(), &NymId::from("bob")).unwrap().is_empty());

        assert!(store.erase_context(&notary(), &alice()).unwrap());
        assert!(store.load_context(&notary(), &alice()).unwrap().is_none());
        assert!(store.load_sent(&notary(), &alice()).unwrap().is_empty());
    }

    #[test]
    fn test_corrupted_value_reported() {
        let backend = Arc::new(MemoryStorage::new());
        backend.store("wallet", b"not json").unwrap();
        let store = ClientStore::new(backend);
        assert!(matches!(
            store.load_wallet(),
            Err(StorageError::Corrupted { .. })
        ));
    }
}
