//! Local cache of decrypted history entries.
//!
//! One `SQLite` file per user directory, opened in WAL mode so concurrent shell
//! sessions can read while another process writes. Deduplication is an
//! explicit existence check on all seven entry fields, not a table constraint.

mod queries;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::Connection;

pub use types::{HistoryEntry, HistoryQuery, QueryAtom, decode_time, encode_time};

use crate::error::StorageError;
use crate::logging::LogSink;

const SLOW_THRESHOLD: Duration = Duration::from_millis(100);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LocalCache {
    conn: Connection,
    log: Arc<LogSink>,
}

impl LocalCache {
    /// Open or create the cache at `path`.
    ///
    /// Safe to call repeatedly: the schema is created if missing and the
    /// journal is switched to WAL every time.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OpenFailure`] if the directory or database cannot
    /// be opened, [`StorageError::SchemaFailure`] if the schema cannot be set up.
    pub fn open(path: &Path, log: Arc<LogSink>) -> Result<Self, StorageError> {
        let open_err = |source: Box<dyn std::error::Error + Send + Sync>| {
            StorageError::OpenFailure {
                path: path.to_path_buf(),
                source,
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| open_err(Box::new(e)))?;
        }
        let conn = Connection::open(path).map_err(|e| open_err(Box::new(e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| open_err(Box::new(e)))?;

        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|source| StorageError::SchemaFailure { source })?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!("history db journal_mode is {mode}, expected wal");
        }
        queries::init_schema(&conn).map_err(|source| StorageError::SchemaFailure { source })?;

        Ok(Self { conn, log })
    }

    /// Open the cache at the default location (`~/.hishtory/.hishtory.db`).
    ///
    /// # Errors
    ///
    /// See [`LocalCache::open`].
    pub fn open_default(log: Arc<LogSink>) -> Result<Self, StorageError> {
        let path = crate::paths::db_path().ok_or_else(|| StorageError::OpenFailure {
            path: ".hishtory".into(),
            source: "cannot determine the hishtory directory".into(),
        })?;
        Self::open(&path, log)
    }

    fn timed<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StorageError> {
        let start = Instant::now();
        let result = f(&self.conn).map_err(|source| StorageError::QueryFailure { op, source });
        let elapsed = start.elapsed();
        if elapsed > SLOW_THRESHOLD {
            self.log.timing(&format!("slow db {op}"), "history_entries", elapsed);
        }
        result
    }

    /// Insert `entry` unless a row equal in all seven fields already exists.
    /// Returns whether a row was inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QueryFailure`] if the statement fails.
    pub fn insert_if_new(&self, entry: &HistoryEntry) -> Result<bool, StorageError> {
        self.timed("insert", |c| queries::insert_if_absent(c, entry))
    }

    /// Whether an identical entry is already cached.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QueryFailure`] if the lookup fails.
    pub fn contains(&self, entry: &HistoryEntry) -> Result<bool, StorageError> {
        self.timed("lookup", |c| queries::find_identical(c, entry))
            .map(|found| found.is_some())
    }

    /// Entries matching `query`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QueryFailure`] if the query fails.
    pub fn query(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, StorageError> {
        self.timed("query", |c| queries::query(c, query))
    }

    /// # Errors
    ///
    /// Returns [`StorageError::QueryFailure`] if the count fails.
    pub fn count(&self) -> Result<i64, StorageError> {
        self.timed("count", queries::count)
    }

    /// Delete every cached entry in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QueryFailure`] if the delete fails.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.timed("clear", queries::clear)
    }
}
