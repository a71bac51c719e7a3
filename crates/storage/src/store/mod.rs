#![forbid(unsafe_code)]

mod error;
mod leases;
mod runs;
mod support;
mod types;

pub use error::StoreError;
pub use support::now_ms;
pub use types::*;

use rusqlite::{Connection, ErrorCode};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_FILE_NAME: &str = "jira_metrics_sync.db";
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_LIST_LIMIT: usize = 500;

/// One connection to the shared coordination database.
///
/// Every replica opens its own store against the same file; all coordination
/// goes through SQLite's write lock and the schema's unique indexes.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_busy_timeout(storage_dir, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_busy_timeout(
        storage_dir: impl AsRef<Path>,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let conn = Connection::open(Self::db_path(&storage_dir))?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        support::migrate_sqlite_schema(&conn)?;

        Ok(Self { conn, storage_dir })
    }

    pub fn db_path(storage_dir: impl AsRef<Path>) -> PathBuf {
        storage_dir.as_ref().join(DB_FILE_NAME)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message
                    .as_deref()
                    .is_some_and(|value| value.contains("UNIQUE constraint failed"))
        }
        _ => false,
    }
}

fn clamp_list_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIST_LIMIT)
}

fn validate_duration_ms(duration_ms: i64) -> Result<(), StoreError> {
    if duration_ms <= 0 {
        return Err(StoreError::InvalidInput("lease duration must be > 0"));
    }
    Ok(())
}
