//! # Transaction number pool
//!
//! Transaction numbers are issued by a notary to one Nym and are the scarce resource that
//! authorises transactions. Per (Nym, notary) pair the client tracks three sets:
//!
//! * *issued*: numbers the notary expects to be closed eventually.
//! * *available*: issued numbers not attached to any in-flight transaction. Builders draw from
//!   here and nowhere else.
//! * *tentative*: numbers the client has claimed from a Nymbox notice but the notary has not
//!   yet confirmed.
//!
//! `available ⊆ issued` and `tentative ∩ issued = ∅` hold after every operation.
//!
//! A drawn number is wrapped in a [ManagedNumber]. Unless the holder marks it successful, the
//! number goes back to *available* when the handle is dropped. Every early return between
//! drawing a number and handing the message to the transport relies on this.

use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::TransactionNumber;
use crate::message::MessageType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumberError {
    #[error("Not enough transaction numbers available: needed {needed}, available {available}")]
    NotEnoughNumbers { needed: usize, available: usize },
}

/// Serializable state of a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberSnapshot {
    pub issued: BTreeSet<TransactionNumber>,
    pub available: BTreeSet<TransactionNumber>,
    pub tentative: BTreeSet<TransactionNumber>,
}

/// Handle to the number sets of one (Nym, notary) pair. Clones share the same state.
#[derive(Clone)]
pub struct NumberPool {
    sets: Arc<Mutex<NumberSnapshot>>,
    label: Arc<String>,
}

impl NumberPool {
    pub fn new<S: Into<String>>(label: S) -> Self {
        Self {
            sets: Arc::new(Mutex::new(NumberSnapshot::default())),
            label: Arc::new(label.into()),
        }
    }

    /// Draws the lowest available number.
    ///
    /// Returns an invalid handle if nothing is available; the caller has to ask the notary for
    /// more numbers before retrying.
    pub fn next_transaction_number(&self, reason: MessageType) -> ManagedNumber {
        let number = self.sets.lock().available.pop_first();
        match number {
            Some(number) => {
                log::debug!("[{}] Drew transaction number {number} for {reason}", self.label);
                ManagedNumber::new(number, self.clone())
            }
            None => {
                log::warn!("[{}] No transaction numbers available for {reason}", self.label);
                ManagedNumber::invalid(self.clone())
            }
        }
    }

    /// Draws `count` numbers at once, or none at all if fewer are available.
    pub fn reserve(
        &self,
        count: usize,
        reason: MessageType,
    ) -> Result<Vec<ManagedNumber>, NumberError> {
        let drawn = {
            let mut sets = self.sets.lock();
            let available = sets.available.len();
            if available < count {
                return Err(NumberError::NotEnoughNumbers {
                    needed: count,
                    available,
                });
            }
            let mut drawn = Vec::with_capacity(count);
            for _ in 0..count {
                if let Some(number) = sets.available.pop_first() {
                    drawn.push(number);
                }
            }
            drawn
        };
        log::debug!("[{}] Reserved {drawn:?} for {reason}", self.label);
        Ok(drawn
            .into_iter()
            .map(|number| ManagedNumber::new(number, self.clone()))
            .collect())
    }

    /// Puts `number` back into *available*, but only if it is still issued.
    ///
    /// Returns false (and leaves the pool untouched) for numbers the notary never issued or
    /// has already closed.
    pub fn recover_available_number(&self, number: TransactionNumber) -> bool {
        let mut sets = self.sets.lock();
        if !sets.issued.contains(&number) {
            log::warn!(
                "[{}] Not recovering transaction number {number}: it is not issued",
                self.label
            );
            return false;
        }
        if sets.available.insert(number) {
            log::debug!("[{}] Recovered transaction number {number}", self.label);
        } else {
            log::trace!("[{}] Transaction number {number} already available", self.label);
        }
        true
    }

    pub fn verify_issued_number(&self, number: TransactionNumber) -> bool {
        self.sets.lock().issued.contains(&number)
    }

    pub fn verify_available_number(&self, number: TransactionNumber) -> bool {
        self.sets.lock().available.contains(&number)
    }

    pub fn verify_tentative_number(&self, number: TransactionNumber) -> bool {
        self.sets.lock().tentative.contains(&number)
    }

    /// Records a number claimed from a Nymbox notice, pending confirmation.
    pub fn add_tentative_number(&self, number: TransactionNumber) -> bool {
        if number <= 0 {
            return false;
        }
        let mut sets = self.sets.lock();
        if sets.issued.contains(&number) {
            log::warn!(
                "[{}] Transaction number {number} is already issued, not adding as tentative",
                self.label
            );
            return false;
        }
        sets.tentative.insert(number)
    }

    /// Moves a tentative number into issued and available once the notary confirmed it.
    pub fn confirm_tentative_number(&self, number: TransactionNumber) -> bool {
        let mut sets = self.sets.lock();
        if !sets.tentative.remove(&number) {
            log::trace!("[{}] Transaction number {number} was not tentative", self.label);
            return false;
        }
        sets.issued.insert(number);
        sets.available.insert(number);
        log::debug!("[{}] Transaction number {number} is now issued", self.label);
        true
    }

    pub fn remove_tentative_number(&self, number: TransactionNumber) -> bool {
        self.sets.lock().tentative.remove(&number)
    }

    /// Adds a number the notary reports as issued, making it available as well.
    pub fn add_issued_number(&self, number: TransactionNumber) -> bool {
        if number <= 0 {
            return false;
        }
        let mut sets = self.sets.lock();
        sets.tentative.remove(&number);
        sets.available.insert(number);
        sets.issued.insert(number)
    }

    /// The notary closed `number`: it leaves issued (and available, if it was there).
    pub fn close_issued_number(&self, number: TransactionNumber) -> bool {
        let mut sets = self.sets.lock();
        sets.available.remove(&number);
        let closed = sets.issued.remove(&number);
        if closed {
            log::debug!("[{}] Closed transaction number {number}", self.label);
        }
        closed
    }

    pub fn available_count(&self) -> usize {
        self.sets.lock().available.len()
    }

    pub fn issued_count(&self) -> usize {
        self.sets.lock().issued.len()
    }

    pub fn tentative_count(&self) -> usize {
        self.sets.lock().tentative.len()
    }

    pub fn issued_numbers(&self) -> BTreeSet<TransactionNumber> {
        self.sets.lock().issued.clone()
    }

    pub fn available_numbers(&self) -> BTreeSet<TransactionNumber> {
        self.sets.lock().available.clone()
    }

    pub fn tentative_numbers(&self) -> BTreeSet<TransactionNumber> {
        self.sets.lock().tentative.clone()
    }

    pub fn snapshot(&self) -> NumberSnapshot {
        self.sets.lock().clone()
    }

    /// Replaces the pool state, dropping anything that would break the set invariants.
    pub fn restore(&self, mut snapshot: NumberSnapshot) {
        let issued = snapshot.issued.clone();
        snapshot.available.retain(|n| issued.contains(n));
        snapshot.tentative.retain(|n| !issued.contains(n));
        *self.sets.lock() = snapshot;
    }
}

impl Debug for NumberPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let sets = self.sets.lock();
        f.debug_struct("NumberPool")
            .field("label", &self.label)
            .field("issued", &sets.issued)
            .field("available", &sets.available)
            .field("tentative", &sets.tentative)
            .finish()
    }
}

/// A drawn transaction number.
///
/// Dropping the handle without [ManagedNumber::set_success] returns the number to the pool.
pub struct ManagedNumber {
    number: TransactionNumber,
    pool: NumberPool,
    success: bool,
}

impl ManagedNumber {
    fn new(number: TransactionNumber, pool: NumberPool) -> Self {
        Self {
            number,
            pool,
            success: false,
        }
    }

    fn invalid(pool: NumberPool) -> Self {
        Self::new(0, pool)
    }

    pub fn valid(&self) -> bool {
        self.number > 0
    }

    pub fn value(&self) -> TransactionNumber {
        self.number
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn set_success(&mut self, success: bool) {
        self.success = success;
    }
}

impl Drop for ManagedNumber {
    fn drop(&mut self) {
        if self.valid() && !self.success {
            self.pool.recover_available_number(self.number);
        }
    }
}

impl Debug for ManagedNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ManagedNumber({}, success: {})", self.number, self.success)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    fn pool_with(numbers: &[TransactionNumber]) -> NumberPool {
        let pool = NumberPool::new("test");
        for n in numbers {
            pool.add_issued_number(*n);
        }
        pool
    }

    #[test]
    fn test_next_number_pops_lowest() {
        let pool = pool_with(&[7, 3, 5]);
        let mut number = pool.next_transaction_number(MessageType::NotarizeTransaction);

        assert!(number.valid());
        assert_eq!(number.value(), 3);
        assert!(!pool.verify_available_number(3));
        assert!(pool.verify_issued_number(3));
        number.set_success(true);
    }

    #[test]
    fn test_empty_pool_gives_invalid_handle() {
        let pool = NumberPool::new("test");
        let number = pool.next_transaction_number(MessageType::NotarizeTransaction);

        assert!(!number.valid());
        assert_eq!(number.value(), 0);
        drop(number);
        assert_eq!(pool.available_count(), 0);
    }

    #[test]
    fn test_dropped_handle_returns_number() {
        let pool = pool_with(&[1, 2]);
        let before = pool.available_numbers();
        {
            let _number = pool.next_transaction_number(MessageType::NotarizeTransaction);
            assert_eq!(pool.available_count(), 1);
        }
        assert_eq!(pool.available_numbers(), before);
    }

    #[test]
    fn test_successful_handle_keeps_number_out() {
        let pool = pool_with(&[1, 2]);
        {
            let mut number = pool.next_transaction_number(MessageType::NotarizeTransaction);
            number.set_success(true);
        }
        assert!(!pool.verify_available_number(1));
        assert!(pool.verify_issued_number(1));
    }

    #[test]
    fn test_recover_is_idempotent() {
        let pool = pool_with(&[4]);
        let mut number = pool.next_transaction_number(MessageType::NotarizeTransaction);
        number.set_success(true);
        drop(number);

        assert!(pool.recover_available_number(4));
        let once = pool.snapshot();
        assert!(pool.recover_available_number(4));
        assert_eq!(pool.snapshot(), once);
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn test_recover_refuses_unissued_number() {
        let pool = pool_with(&[4]);
        let before = pool.snapshot();

        assert!(!pool.recover_available_number(99));
        assert!(!pool.recover_available_number(99));
        assert_eq!(pool.snapshot(), before);
    }

    #[test]
    fn test_dropped_handle_after_close_does_not_resurrect() {
        let pool = pool_with(&[8]);
        let number = pool.next_transaction_number(MessageType::NotarizeTransaction);
        pool.close_issued_number(8);
        drop(number);

        assert!(!pool.verify_issued_number(8));
        assert!(!pool.verify_available_number(8));
    }

    #[test]
    fn test_reserve_all_or_nothing() {
        let pool = pool_with(&[1, 2]);
        let before = pool.snapshot();

        assert_matches!(
            pool.reserve(3, MessageType::NotarizeTransaction),
            Err(NumberError::NotEnoughNumbers {
                needed: 3,
                available: 2
            })
        );
        assert_eq!(pool.snapshot(), before);

        let numbers = pool.reserve(2, MessageType::NotarizeTransaction).unwrap();
        assert_eq!(numbers.iter().map(|n| n.value()).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(pool.available_count(), 0);
        drop(numbers);
        assert_eq!(pool.snapshot(), before);
    }

    #[test]
    fn test_tentative_lifecycle() {
        let pool = NumberPool::new("test");

        assert!(pool.add_tentative_number(10));
        assert!(pool.verify_tentative_number(10));
        assert!(!pool.verify_issued_number(10));
        assert!(!pool.recover_available_number(10));

        assert!(pool.confirm_tentative_number(10));
        assert!(!pool.verify_tentative_number(10));
        assert!(pool.verify_issued_number(10));
        assert!(pool.verify_available_number(10));

        assert!(!pool.add_tentative_number(10));
        assert!(!pool.confirm_tentative_number(10));
    }

    #[test]
    fn test_restore_enforces_invariants() {
        let pool = NumberPool::new("test");
        let snapshot = NumberSnapshot {
            issued: [1, 2].into_iter().collect(),
            available: [2, 3].into_iter().collect(),
            tentative: [1, 4].into_iter().collect(),
        };
        pool.restore(snapshot);

        assert_eq!(pool.available_numbers(), [2].into_iter().collect());
        assert_eq!(pool.tentative_numbers(), [4].into_iter().collect());
    }
}
