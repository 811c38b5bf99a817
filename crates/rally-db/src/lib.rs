pub mod conversations;
pub mod error;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod permissions;
pub mod reactions;
pub mod unread;
pub mod users;

pub use error::{Result, StoreError};

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rally_crypto::Codec;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

/// Default number of messages per history page.
pub const DEFAULT_PAGE_SIZE: u32 = 30;

pub struct Database {
    conn: Mutex<Connection>,
    codec: Codec,
    page_size: u32,
}

impl Database {
    pub fn open(path: &Path, codec: Codec) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!("Database opened at {} (journal_mode={})", path.display(), mode);

        Self::init(conn, codec)
    }

    pub fn open_in_memory(codec: Codec) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, codec)
    }

    fn init(conn: Connection, codec: Codec) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            codec,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub(crate) fn codec(&self) -> &Codec {
        &self.codec
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Internal(format!("DB lock poisoned: {}", e)))
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside an IMMEDIATE transaction. Any error rolls back every
    /// write `f` made.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}
