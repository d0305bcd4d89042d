pub mod conversations;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod retry;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub use retry::RetryPolicy;

/// Bounds applied to the message store's unit of work.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Trailing interval in which identical sends collapse to one row.
    pub dedup_window: Duration,
    /// How long to wait for the write lock before reporting a conflict.
    pub tx_max_wait: Duration,
    /// Upper bound on a single transaction; exceeding it rolls back.
    pub tx_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_millis(5000),
            tx_max_wait: Duration::from_millis(5000),
            tx_timeout: Duration::from_millis(10_000),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Database {
    conn: Mutex<Connection>,
    config: StoreConfig,
}

impl Database {
    pub fn open(path: &Path, config: StoreConfig) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::init(conn, config)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory(config: StoreConfig) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, config)
    }

    fn init(conn: Connection, config: StoreConfig) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(config.tx_max_wait)?;

        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
