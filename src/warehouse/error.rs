//! Error types for warehouse operations

use std::io;
use thiserror::Error;

/// Result type alias for warehouse operations
pub type WarehouseResult<T> = std::result::Result<T, WarehouseError>;

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("Cannot connect to warehouse: {0}")]
    Unreachable(String),

    #[error("Invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("Session is closed")]
    Closed,

    #[error("Content stream for {key} failed: {source}")]
    Stream { key: String, source: io::Error },

    #[error("Size mismatch for {key}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("{key} is {size} bytes, larger than the warehouse accepts ({max})")]
    TooLarge { key: String, size: u64, max: u64 },

    #[error("Table {0} does not exist")]
    NoSuchTable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl WarehouseError {
    /// Lock contention that a later run would likely get past
    pub fn is_busy(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            WarehouseError::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}
