pub mod error;
pub mod migrations;
pub mod models;
pub mod posts;
pub mod query;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

pub use error::{DbError, Result};
pub use query::{Field, Filter, PostQuery};

const READER_POOL_SIZE: usize = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Post store with a reader/writer split.
///
/// All writes go through one connection inside `IMMEDIATE` transactions.
/// Reads use a small pool of read-only connections; each read runs in its own
/// transaction so every statement in it sees the same snapshot.
pub struct Store {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
}

impl Store {
    /// Opens (or creates) the store at `path` and brings its schema up to date.
    ///
    /// Refuses to open if the schema cannot be migrated.
    pub fn open(path: &Path) -> Result<Self> {
        let mut writer = Connection::open(path)?;
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.busy_timeout(BUSY_TIMEOUT)?;

        migrations::run(&mut writer)?;

        let mut readers = Vec::with_capacity(READER_POOL_SIZE);
        for _ in 0..READER_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Post store opened at {} (1 writer + {} readers)",
            path.display(),
            READER_POOL_SIZE
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
        })
    }

    /// Runs `f` inside a read transaction on one of the reader connections.
    pub fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let mut conn = self.readers[idx]
            .lock()
            .map_err(|_| DbError::Poisoned("reader"))?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Runs `f` inside a write transaction. Nothing `f` did is kept unless it
    /// returns `Ok`.
    pub fn write<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self
            .writer
            .lock()
            .map_err(|_| DbError::Poisoned("writer"))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
