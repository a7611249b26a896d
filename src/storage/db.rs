//! Database connection management and migrations

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database error type
///
/// Any of these means the store is unavailable for the operation in flight.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Migration failed: {0}")]
    MigrationFailed(String),
    #[error("Query failed: {0}")]
    QueryFailed(#[from] rusqlite::Error),
    #[error("Job {id} cannot move to {to}")]
    InvalidTransition { id: String, to: &'static str },
}

/// Wrapper around SQLite connection
pub struct Database {
    pub conn: Connection,
    pub path: Option<PathBuf>,
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open or create the database file at `path`
pub fn open_database(path: &Path) -> Result<Database, DatabaseError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to create {:?}: {}", parent, e))
        })?;
    }

    info!("Opening database at {:?}", path);

    let conn = Connection::open(path)
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(|e| DatabaseError::MigrationFailed(format!("Failed to enable WAL: {}", e)))?;
    info!("SQLite journal mode: {}", mode);

    prepare(&conn)?;

    Ok(Database {
        conn,
        path: Some(path.to_path_buf()),
    })
}

/// Open a private in-memory database with the full schema
pub fn open_in_memory() -> Result<Database, DatabaseError> {
    let conn = Connection::open_in_memory()
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
    prepare(&conn)?;
    Ok(Database { conn, path: None })
}

fn prepare(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute("PRAGMA foreign_keys = ON", [])
        .map_err(|e| DatabaseError::MigrationFailed(format!("Failed to enable foreign keys: {}", e)))?;
    run_migrations(conn)
}

/// Run database schema migrations
fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version: i32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    info!("Current schema version: {}", current_version);

    if current_version < 1 {
        info!("Applying migration v1: users, jobs, notifications, api_usage");
        conn.execute_batch(include_str!("schema.sql"))
            .map_err(|e| DatabaseError::MigrationFailed(format!("Failed to apply v1 schema: {}", e)))?;
    }

    Ok(())
}
