use std::path::Path;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::utilities::hash::HashType;

pub(crate) struct DbQuery {
    pub(crate) connection: Connection,
}

impl DbQuery {
    pub(crate) fn open(path: &Path, flags: OpenFlags) -> anyhow::Result<Self> {
        let connection = Connection::open_with_flags(path, flags)?;
        let query = Self { connection };
        Ok(query)
    }

    pub(crate) fn get_value(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        log::trace!("Getting value by key: {}", key);

        let mut stmt = self
            .connection
            .prepare_cached("SELECT value FROM entries WHERE key = ?1")?;
        let value = stmt
            .query_row(params![key], |row| row.get::<_, Vec<u8>>(0))
            .optional()?;

        if value.is_none() {
            log::trace!("Value not found: {}", key);
        }
        Ok(value)
    }

    pub(crate) fn get_root_hash(&self) -> anyhow::Result<Option<HashType>> {
        let mut stmt = self
            .connection
            .prepare_cached("SELECT hash FROM root_hash WHERE id = 0")?;
        let hash = stmt
            .query_row(params![], |row| row.get::<_, Vec<u8>>(0))
            .optional()?;

        hash.map(|bytes| {
            <[u8; 32]>::try_from(bytes.as_slice())
                .map(HashType::new)
                .map_err(|_| anyhow::anyhow!("Stored root hash has wrong length"))
        })
        .transpose()
    }
}
