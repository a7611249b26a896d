//! Storage module for SQLite database operations
//!
//! This module provides:
//! - Database connection management
//! - Schema migrations
//! - Repository pattern implementations for all entities
//! - A cloneable [`Store`] handle shared by the submission path and the worker

pub mod db;
pub mod job_repo;
pub mod notification_repo;
pub mod usage_repo;
pub mod user_repo;

pub use db::{open_database, open_in_memory, Database, DatabaseError};
pub use job_repo::JobRepo;
pub use notification_repo::NotificationRepo;
pub use usage_repo::UsageRepo;
pub use user_repo::UserRepo;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared handle to the durable store
///
/// Every call holds the connection lock for the duration of one closure, which
/// makes each call atomic with respect to every other caller in the process.
/// The lock is never held across an `.await`.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open (and migrate) the database file at `path`
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        open_database(path).map(Self::new)
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        open_in_memory().map(Self::new)
    }

    /// Run a read or single-statement write against the connection
    pub fn with_conn<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E> {
        let db = self.lock();
        f(&db.conn)
    }

    /// Run `f` inside an immediate transaction; commits only if `f` returns `Ok`
    pub fn transaction<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DatabaseError>,
    {
        let mut db = self.lock();
        let tx = db
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(DatabaseError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(value)
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        // A panic mid-closure drops its transaction, which rolls back.
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-width RFC 3339 so lexical order is chronological order
pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse the timestamp stored in column `idx`
pub(crate) fn decode_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn decode_opt_ts(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| decode_ts(idx, &s)).transpose()
}
