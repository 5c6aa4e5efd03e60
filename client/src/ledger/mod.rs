//! Boxes: ledgers of receipts keyed by transaction number.
//!
//! Box entries are either *abbreviated* (header plus the digest of the full receipt, as the
//! notary sends them in box listings) or *full*. An abbreviated entry is hydrated by fetching
//! the box receipt and checking it against the digest.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::{AccountId, Amount, NotaryId, NymId, TransactionNumber};
use crate::utilities::hash::HashType;

pub mod item;
pub mod transaction;

pub use item::{Item, ItemStatus, ItemType};
pub use transaction::{Attachment, Transaction, TransactionHeader, TransactionType};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Transaction {0} is already in the box")]
    Duplicate(TransactionNumber),
    #[error("Transaction {0} is not in the box")]
    NotFound(TransactionNumber),
    #[error("Box receipt {0} does not match the digest of its abbreviated entry")]
    DigestMismatch(TransactionNumber),
    #[error("Box receipt {0} does not match the header of its abbreviated entry")]
    HeaderMismatch(TransactionNumber),
    #[error("Box entry {0} is abbreviated and its receipt has not been downloaded")]
    NotHydrated(TransactionNumber),
    #[error("Encoding error: {0}")]
    Encoding(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BoxType {
    Nymbox,
    Inbox,
    Outbox,
    PaymentInbox,
    RecordBox,
    ExpiredBox,
    Outpayments,
}

impl BoxType {
    pub fn is_account_box(&self) -> bool {
        matches!(self, BoxType::Inbox | BoxType::Outbox)
    }

    pub fn path_segment(&self) -> &'static str {
        match self {
            BoxType::Nymbox => "nymbox",
            BoxType::Inbox => "inbox",
            BoxType::Outbox => "outbox",
            BoxType::PaymentInbox => "paymentInbox",
            BoxType::RecordBox => "recordBox",
            BoxType::ExpiredBox => "expiredBox",
            BoxType::Outpayments => "outpayments",
        }
    }
}

impl Display for BoxType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path_segment())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abbreviation {
    pub header: TransactionHeader,
    pub digest: HashType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoxEntry {
    Abbreviated(Abbreviation),
    Full(Box<Transaction>),
}

impl BoxEntry {
    pub fn header(&self) -> &TransactionHeader {
        match self {
            BoxEntry::Abbreviated(abbreviation) => &abbreviation.header,
            BoxEntry::Full(transaction) => &transaction.header,
        }
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            BoxEntry::Abbreviated(_) => None,
            BoxEntry::Full(transaction) => Some(transaction),
        }
    }

    pub fn is_abbreviated(&self) -> bool {
        matches!(self, BoxEntry::Abbreviated(_))
    }

    pub fn digest(&self) -> anyhow::Result<HashType> {
        match self {
            BoxEntry::Abbreviated(abbreviation) => Ok(abbreviation.digest),
            BoxEntry::Full(transaction) => transaction.digest(),
        }
    }
}

/// One line of a box report. Box hashes are computed over the report so they do not depend
/// on whether entries are hydrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLine {
    pub number: TransactionNumber,
    pub transaction_type: TransactionType,
    pub amount: Amount,
    pub digest: HashType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub box_type: BoxType,
    pub nym_id: NymId,
    pub account_id: Option<AccountId>,
    pub notary_id: NotaryId,
    entries: BTreeMap<TransactionNumber, BoxEntry>,
}

impl Ledger {
    pub fn new(
        box_type: BoxType,
        nym_id: NymId,
        account_id: Option<AccountId>,
        notary_id: NotaryId,
    ) -> Self {
        Self {
            box_type,
            nym_id,
            account_id,
            notary_id,
            entries: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, transaction: Transaction) -> Result<(), LedgerError> {
        let number = transaction.number();
        if self.entries.contains_key(&number) {
            return Err(LedgerError::Duplicate(number));
        }
        log::trace!("Adding {} {number} to {}", transaction.transaction_type(), self.box_type);
        self.entries
            .insert(number, BoxEntry::Full(Box::new(transaction)));
        Ok(())
    }

    pub fn add_abbreviated(&mut self, abbreviation: Abbreviation) -> Result<(), LedgerError> {
        let number = abbreviation.header.number;
        if self.entries.contains_key(&number) {
            return Err(LedgerError::Duplicate(number));
        }
        self.entries
            .insert(number, BoxEntry::Abbreviated(abbreviation));
        Ok(())
    }

    pub fn remove(&mut self, number: TransactionNumber) -> Option<BoxEntry> {
        let removed = self.entries.remove(&number);
        if removed.is_none() {
            log::warn!("Transaction {number} not found in {}", self.box_type);
        }
        removed
    }

    pub fn get(&self, number: TransactionNumber) -> Option<&BoxEntry> {
        self.entries.get(&number)
    }

    /// The full receipt, or [LedgerError::NotHydrated] if only the abbreviation is known.
    pub fn transaction(&self, number: TransactionNumber) -> Result<&Transaction, LedgerError> {
        match self.entries.get(&number) {
            None => Err(LedgerError::NotFound(number)),
            Some(BoxEntry::Abbreviated(_)) => Err(LedgerError::NotHydrated(number)),
            Some(BoxEntry::Full(transaction)) => Ok(transaction),
        }
    }

    pub fn contains(&self, number: TransactionNumber) -> bool {
        self.entries.contains_key(&number)
    }

    pub fn entries(&self) -> impl Iterator<Item = &BoxEntry> {
        self.entries.values()
    }

    pub fn headers(&self) -> impl Iterator<Item = &TransactionHeader> {
        self.entries.values().map(BoxEntry::header)
    }

    pub fn numbers(&self) -> Vec<TransactionNumber> {
        self.entries.keys().copied().collect()
    }

    pub fn abbreviated_numbers(&self) -> Vec<TransactionNumber> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_abbreviated())
            .map(|(number, _)| *number)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces an abbreviated entry with its full receipt.
    ///
    /// The receipt must match both the header and the digest of the abbreviation. Hydrating an
    /// entry that is already full is a no-op as long as the receipts are identical.
    pub fn hydrate(&mut self, receipt: Transaction) -> Result<(), LedgerError> {
        let number = receipt.number();
        let entry = self
            .entries
            .get_mut(&number)
            .ok_or(LedgerError::NotFound(number))?;

        if entry.header() != &receipt.header {
            return Err(LedgerError::HeaderMismatch(number));
        }
        if entry.digest()? != receipt.digest()? {
            log::error!("Box receipt {number} failed digest check in {}", self.box_type);
            return Err(LedgerError::DigestMismatch(number));
        }
        *entry = BoxEntry::Full(Box::new(receipt));
        log::debug!("Hydrated box receipt {number} in {}", self.box_type);
        Ok(())
    }

    /// Abbreviated copy of this ledger plus the full receipts it held.
    pub fn abbreviate(&self) -> anyhow::Result<(Ledger, Vec<Transaction>)> {
        let mut abbreviated = Ledger::new(
            self.box_type,
            self.nym_id.clone(),
            self.account_id.clone(),
            self.notary_id.clone(),
        );
        let mut receipts = Vec::new();
        for (number, entry) in &self.entries {
            let abbreviation = Abbreviation {
                header: entry.header().clone(),
                digest: entry.digest()?,
            };
            abbreviated
                .entries
                .insert(*number, BoxEntry::Abbreviated(abbreviation));
            if let BoxEntry::Full(transaction) = entry {
                receipts.push(transaction.as_ref().clone());
            }
        }
        Ok((abbreviated, receipts))
    }

    pub fn report(&self) -> anyhow::Result<Vec<ReportLine>> {
        self.entries
            .values()
            .map(|entry| {
                let header = entry.header();
                Ok(ReportLine {
                    number: header.number,
                    transaction_type: header.transaction_type,
                    amount: header.amount,
                    digest: entry.digest()?,
                })
            })
            .collect()
    }

    pub fn hash(&self) -> anyhow::Result<HashType> {
        HashType::of(&self.report()?)
    }

    /// Receipts generated for the request or cron item opened with `opening`.
    pub fn receipts_referencing(
        &self,
        opening: TransactionNumber,
    ) -> impl Iterator<Item = &TransactionHeader> {
        self.headers()
            .filter(move |header| header.in_reference_to == opening)
    }
}
