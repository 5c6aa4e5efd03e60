use std::path::PathBuf;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};

use crate::storage::sqlite::query::DbQuery;
use crate::storage::sqlite::store::DbStore;
use crate::storage::Storage;
use crate::utilities::hash::HashType;

pub(crate) mod query;
pub(crate) mod store;

mod migrations {
    use refinery::embed_migrations;

    embed_migrations!("migrations");
}

pub struct SqliteStorage {
    db_store: Mutex<DbStore>,
    db_query: Mutex<DbQuery>,
}

impl SqliteStorage {
    pub fn open<P: Into<PathBuf>>(path: P, create_if_not_exists: bool) -> anyhow::Result<Self> {
        let path = path.into();
        let mut flags = OpenFlags::default();
        if !create_if_not_exists {
            flags.remove(OpenFlags::SQLITE_OPEN_CREATE);
        }

        let mut connection = Connection::open_with_flags(&path, flags)?;
        Self::run_migrations(&mut connection)?;

        log::info!("Starting sqlite storage with path: {}", path.display());
        let db_store = DbStore::open(&path, flags)?;
        let db_query = DbQuery::open(&path, flags)?;
        Ok(Self {
            db_store: Mutex::new(db_store),
            db_query: Mutex::new(db_query),
        })
    }

    pub fn run_migrations(connection: &mut Connection) -> anyhow::Result<()> {
        log::info!("Running database migrations");
        match migrations::migrations::runner().run(connection) {
            Ok(ok) => {
                log::info!("Database migrations completed:{:?} ", ok);
                Ok(())
            }
            Err(err) => {
                log::error!("Database migrations failed: {}", err);
                Err(anyhow::anyhow!(err))
            }
        }
    }
}

impl Storage for SqliteStorage {
    fn load(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.db_query.lock().get_value(key)
    }

    fn store(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.db_store
            .lock()
            .store_batch(&[(key.to_string(), value.to_vec())])
    }

    fn store_batch(&self, entries: &[(String, Vec<u8>)]) -> anyhow::Result<()> {
        self.db_store.lock().store_batch(entries)
    }

    fn erase(&self, key: &str) -> anyhow::Result<bool> {
        self.db_store.lock().erase(key)
    }

    fn root_hash(&self) -> anyhow::Result<Option<HashType>> {
        self.db_query.lock().get_root_hash()
    }
}
