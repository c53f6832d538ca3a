//! Warehouse abstraction
//!
//! A [`Warehouse`] hands out a [`WarehouseSession`]; the session is the only
//! thing that touches tables. Each transferred object becomes one row:
//! file name, size, content, upload timestamp and source key.

pub mod error;
mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use error::{WarehouseError, WarehouseResult};
pub use memory::{MemoryWarehouse, StoredRow};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteWarehouse;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::ReadStream;
use crate::config::WarehouseConfig;
use crate::error::Result;

/// Row metadata for one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Last `/`-separated segment of the key
    pub file_name: String,
    /// Size from the listing
    pub size: u64,
    /// Full source key, the dedup identity within a table
    pub key: String,
}

impl FileRecord {
    pub fn for_key(key: &str, size: u64) -> Self {
        Self {
            file_name: file_name_of(key).to_string(),
            size,
            key: key.to_string(),
        }
    }
}

/// Last segment of a key (the whole key when it has no `/`)
pub fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Table names are plain SQL identifiers: `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn check_table_name(name: &str) -> WarehouseResult<()> {
    if is_valid_table_name(name) {
        Ok(())
    } else {
        Err(WarehouseError::InvalidTableName(name.to_string()))
    }
}

/// Entry point to a warehouse
#[async_trait]
pub trait Warehouse: Send + Sync {
    fn name(&self) -> &str;

    /// Open a session; the caller closes it when the run ends
    async fn connect(&self) -> WarehouseResult<Box<dyn WarehouseSession>>;
}

/// A scoped connection to the warehouse
///
/// Sessions are shared by concurrent transfers, so every method takes `&self`.
#[async_trait]
pub trait WarehouseSession: Send + Sync {
    /// Cheap round trip proving the session works
    async fn test_connection(&self) -> WarehouseResult<()>;

    /// Create the table if it does not exist. Idempotent.
    async fn ensure_table(&self, table: &str) -> WarehouseResult<()>;

    /// Every source key already recorded in `table`
    async fn query_distinct_keys(&self, table: &str) -> WarehouseResult<HashSet<String>>;

    /// Write one row from content already in memory
    async fn insert_buffered(
        &self,
        table: &str,
        record: &FileRecord,
        content: Bytes,
    ) -> WarehouseResult<()>;

    /// Write one row while consuming `content` chunk by chunk
    ///
    /// Returns the number of bytes written. Nothing is kept if the stream
    /// fails or yields a byte count other than `record.size`.
    async fn insert_streamed(
        &self,
        table: &str,
        record: &FileRecord,
        content: ReadStream,
    ) -> WarehouseResult<u64>;

    /// Release the session. Further calls fail with [`WarehouseError::Closed`].
    async fn close(&self) -> WarehouseResult<()>;
}

/// Build the warehouse described by the configuration
pub fn open_warehouse(config: &WarehouseConfig) -> Result<Arc<dyn Warehouse>> {
    match config {
        #[cfg(feature = "sqlite")]
        WarehouseConfig::Sqlite(sqlite) => Ok(Arc::new(SqliteWarehouse::from_config(sqlite))),

        #[cfg(not(feature = "sqlite"))]
        WarehouseConfig::Sqlite(_) => Err(crate::error::IngestError::Config(
            "SQLite warehouses require the 'sqlite' feature".to_string(),
        )),
    }
}
