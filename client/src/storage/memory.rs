use std::collections::HashMap;

use parking_lot::RwLock;

use crate::storage::{chain_root_hash, Storage};
use crate::utilities::hash::HashType;

/// Storage kept in memory. Used for tests and short-lived clients.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    root_hash: RwLock<Option<HashType>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn store(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.store_batch(&[(key.to_string(), value.to_vec())])
    }

    fn store_batch(&self, entries: &[(String, Vec<u8>)]) -> anyhow::Result<()> {
        let mut stored = self.entries.write();
        let mut root_hash = self.root_hash.write();
        for (key, value) in entries {
            stored.insert(key.clone(), value.clone());
        }
        *root_hash = Some(chain_root_hash(*root_hash, entries));
        Ok(())
    }

    fn erase(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn root_hash(&self) -> anyhow::Result<Option<HashType>> {
        Ok(*self.root_hash.read())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_root_hash_changes_with_every_batch() {
        let storage = MemoryStorage::new();
        assert!(storage.root_hash().unwrap().is_none());

        storage.store("a", b"1").unwrap();
        let first = storage.root_hash().unwrap();
        storage.store("a", b"1").unwrap();
        assert_ne!(storage.root_hash().unwrap(), first);
    }

    #[test]
    fn test_erase() {
        let storage = MemoryStorage::new();
        storage.store("a", b"1").unwrap();
        assert!(storage.erase("a").unwrap());
        assert!(!storage.erase("a").unwrap());
        assert!(storage.load("a").unwrap().is_none());
    }
}
