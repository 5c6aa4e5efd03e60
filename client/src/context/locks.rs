use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::identifier::{NotaryId, NymId};

/// One reentrant lock per (Nym, notary) pair.
///
/// Operations on a pair hold its lock for their whole duration and may call each other while
/// holding it. Different pairs never contend.
#[derive(Default)]
pub struct ContextLocks {
    locks: Mutex<HashMap<(NymId, NotaryId), Arc<ReentrantMutex<()>>>>,
}

impl ContextLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, nym: &NymId, notary: &NotaryId) -> Arc<ReentrantMutex<()>> {
        self.locks
            .lock()
            .entry((nym.clone(), notary.clone()))
            .or_insert_with(|| Arc::new(ReentrantMutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_same_pair_shares_lock() {
        let locks = ContextLocks::new();
        let nym = NymId::from("alice");
        let notary = NotaryId::from("notary");

        let first = locks.get(&nym, &notary);
        let second = locks.get(&nym, &notary);
        assert!(Arc::ptr_eq(&first, &second));

        let other = locks.get(&NymId::from("bob"), &notary);
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_lock_is_reentrant() {
        let locks = ContextLocks::new();
        let lock = locks.get(&NymId::from("alice"), &NotaryId::from("notary"));

        let _outer = lock.lock();
        let _inner = lock.lock();
    }

    #[test]
    fn test_other_pair_not_blocked() {
        let locks = Arc::new(ContextLocks::new());
        let notary = NotaryId::from("notary");
        let lock = locks.get(&NymId::from("alice"), &notary);
        let _held = lock.lock();

        let shared = locks.clone();
        let handle = std::thread::spawn(move || {
            let lock = shared.get(&NymId::from("bob"), &NotaryId::from("notary"));
            let _guard = lock.lock();
            true
        });
        assert!(handle.join().unwrap());
    }
}
