//! SQLite connection pool (spec.md §4.1).
//!
//! Grounded closely on the teacher's `db_management::pool_manager` module: every freshly
//! created connection loads the `array` virtual-table module (needed for `IN`/`NOT IN`
//! queries against Rust-side slices) and turns on foreign-key enforcement.

use std::path::PathBuf;

use deadpool::managed::{Manager, Metrics, RecycleResult};
use rusqlite::{vtab::array, Connection};

use crate::error::Error;

deadpool::managed_reexports!(
    "quillstore",
    SqlitePoolManager,
    deadpool::managed::Object<SqlitePoolManager>,
    rusqlite::Error,
    Error
);

const RUNTIME: deadpool::Runtime = deadpool::Runtime::Tokio1;

/// Builds raw [`rusqlite::Connection`]s for the pool.
pub struct SqlitePoolManager {
    database_path: PathBuf,
}

impl SqlitePoolManager {
    pub fn new(database_path: PathBuf) -> Self {
        Self { database_path }
    }

    /// In-memory manager, used by tests and embedders that want a throwaway database.
    pub fn in_memory() -> Self {
        Self { database_path: PathBuf::from(":memory:") }
    }

    fn new_connection(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.database_path)?;
        array::load_module(&conn)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }
}

impl Manager for SqlitePoolManager {
    type Type = deadpool_sync::SyncWrapper<Connection>;
    type Error = rusqlite::Error;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.new_connection();
        deadpool_sync::SyncWrapper::new(RUNTIME, move || conn).await
    }

    async fn recycle(&self, _: &mut Self::Type, _: &Metrics) -> RecycleResult<Self::Error> {
        Ok(())
    }
}

/// Builds a connection pool for the given database path. `:memory:` gets a single-
/// connection pool, since SQLite's in-memory databases are private per connection.
pub fn build_pool(database_path: PathBuf) -> Result<Pool, Error> {
    let is_memory = database_path == PathBuf::from(":memory:");
    let manager = SqlitePoolManager::new(database_path);
    let mut builder = Pool::builder(manager);
    if is_memory {
        builder = builder.max_size(1);
    }
    builder.build().map_err(|e| Error::DatabaseRequestError(e.to_string()))
}
