use std::path::Path;

use anyhow::Result;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::storage::chain_root_hash;
use crate::utilities::hash::HashType;

pub(crate) struct DbStore {
    connection: Connection,
}

impl DbStore {
    pub(crate) fn open(path: &Path, flags: OpenFlags) -> Result<DbStore> {
        let connection = Connection::open_with_flags(path, flags)?;
        Ok(DbStore { connection })
    }

    /// Upserts every entry and the new root hash in one transaction.
    pub(crate) fn store_batch(&mut self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        log::trace!("Storing batch of {} entries", entries.len());

        let tx = self.connection.transaction()?;
        {
            let previous = tx
                .prepare_cached("SELECT hash FROM root_hash WHERE id = 0")?
                .query_row(params![], |row| row.get::<_, Vec<u8>>(0))
                .optional()?
                .map(|bytes| {
                    <[u8; 32]>::try_from(bytes.as_slice())
                        .map(HashType::new)
                        .map_err(|_| anyhow::anyhow!("Stored root hash has wrong length"))
                })
                .transpose()?;

            let mut statement = tx.prepare_cached(
                "INSERT INTO entries (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            for (key, value) in entries {
                statement.execute(params![key, value])?;
            }

            let root = chain_root_hash(previous, entries);
            let mut statement = tx.prepare_cached(
                "INSERT INTO root_hash (id, hash) VALUES (0, ?1) \
                 ON CONFLICT(id) DO UPDATE SET hash = excluded.hash",
            )?;
            statement.execute(params![root.inner().to_vec()])?;
        }
        tx.commit()?;

        Ok(())
    }

    pub(crate) fn erase(&mut self, key: &str) -> Result<bool> {
        log::trace!("Erasing {key}");
        let mut statement = self
            .connection
            .prepare_cached("DELETE FROM entries WHERE key = ?1")?;
        let deleted = statement.execute(params![key])?;
        Ok(deleted > 0)
    }
}
