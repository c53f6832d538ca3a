//! In-memory warehouse with failure injection, for tests and dry runs

use super::error::{WarehouseError, WarehouseResult};
use super::{check_table_name, FileRecord, Warehouse, WarehouseSession};
use crate::backend::ReadStream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One stored row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub file_name: String,
    pub file_size: u64,
    pub content: Bytes,
    pub upload_timestamp: DateTime<Utc>,
    pub key: String,
    /// Written through the streamed path
    pub streamed: bool,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Vec<StoredRow>>,
    ensure_calls: usize,
    failing_keys: HashSet<String>,
    failing_tables: HashSet<String>,
    unreachable: bool,
    sessions_opened: usize,
    sessions_closed: usize,
}

/// Warehouse held in memory; clones share state
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    // A panicking test thread must not hide the rows from the assertions
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` as already transferred into `table`
    pub fn seed(&self, table: &str, key: &str, content: impl Into<Bytes>) {
        let content = content.into();
        let record = FileRecord::for_key(key, content.len() as u64);
        lock(&self.state)
            .tables
            .entry(table.to_string())
            .or_default()
            .push(StoredRow {
                file_name: record.file_name,
                file_size: record.size,
                content,
                upload_timestamp: Utc::now(),
                key: record.key,
                streamed: false,
            });
    }

    /// Inserts for `key` fail
    pub fn fail_inserts_for(&self, key: &str) {
        lock(&self.state).failing_keys.insert(key.to_string());
    }

    /// Table setup and dedup queries for `table` fail
    pub fn fail_planning_for(&self, table: &str) {
        lock(&self.state).failing_tables.insert(table.to_string());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        lock(&self.state).unreachable = unreachable;
    }

    /// Rows of `table` in insertion order
    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        lock(&self.state)
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tables(&self) -> Vec<String> {
        lock(&self.state).tables.keys().cloned().collect()
    }

    pub fn total_rows(&self) -> usize {
        lock(&self.state).tables.values().map(Vec::len).sum()
    }

    pub fn ensure_calls(&self) -> usize {
        lock(&self.state).ensure_calls
    }

    pub fn sessions_opened(&self) -> usize {
        lock(&self.state).sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        lock(&self.state).sessions_closed
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> WarehouseResult<Box<dyn WarehouseSession>> {
        let mut state = lock(&self.state);
        if state.unreachable {
            return Err(WarehouseError::Unreachable(
                "memory warehouse marked unreachable".to_string(),
            ));
        }
        state.sessions_opened += 1;
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<State>>,
    closed: AtomicBool,
}

impl MemorySession {
    fn open_state(&self) -> WarehouseResult<MutexGuard<'_, State>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WarehouseError::Closed);
        }
        Ok(lock(&self.state))
    }

    fn store(&self, table: &str, record: &FileRecord, content: Bytes, streamed: bool) -> WarehouseResult<()> {
        let mut state = self.open_state()?;
        if state.failing_keys.contains(&record.key) {
            return Err(WarehouseError::Rejected(format!(
                "injected insert failure for {}",
                record.key
            )));
        }
        let rows = state
            .tables
            .get_mut(table)
            .ok_or_else(|| WarehouseError::NoSuchTable(table.to_string()))?;
        rows.push(StoredRow {
            file_name: record.file_name.clone(),
            file_size: record.size,
            content,
            upload_timestamp: Utc::now(),
            key: record.key.clone(),
            streamed,
        });
        Ok(())
    }
}

#[async_trait]
impl WarehouseSession for MemorySession {
    async fn test_connection(&self) -> WarehouseResult<()> {
        let state = self.open_state()?;
        if state.unreachable {
            return Err(WarehouseError::Unreachable(
                "memory warehouse marked unreachable".to_string(),
            ));
        }
        Ok(())
    }

    async fn ensure_table(&self, table: &str) -> WarehouseResult<()> {
        check_table_name(table)?;
        let mut state = self.open_state()?;
        state.ensure_calls += 1;
        if state.failing_tables.contains(table) {
            return Err(WarehouseError::Rejected(format!(
                "injected setup failure for {}",
                table
            )));
        }
        state.tables.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn query_distinct_keys(&self, table: &str) -> WarehouseResult<HashSet<String>> {
        check_table_name(table)?;
        let state = self.open_state()?;
        let rows = state
            .tables
            .get(table)
            .ok_or_else(|| WarehouseError::NoSuchTable(table.to_string()))?;
        Ok(rows.iter().map(|row| row.key.clone()).collect())
    }

    async fn insert_buffered(
        &self,
        table: &str,
        record: &FileRecord,
        content: Bytes,
    ) -> WarehouseResult<()> {
        check_table_name(table)?;
        self.store(table, record, content, false)
    }

    async fn insert_streamed(
        &self,
        table: &str,
        record: &FileRecord,
        mut content: ReadStream,
    ) -> WarehouseResult<u64> {
        check_table_name(table)?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = content.next().await {
            let chunk = chunk.map_err(|source| WarehouseError::Stream {
                key: record.key.clone(),
                source,
            })?;
            buffer.extend_from_slice(&chunk);
        }

        let written = buffer.len() as u64;
        if written != record.size {
            return Err(WarehouseError::SizeMismatch {
                key: record.key.clone(),
                expected: record.size,
                actual: written,
            });
        }

        self.store(table, record, buffer.freeze(), true)?;
        Ok(written)
    }

    async fn close(&self) -> WarehouseResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            lock(&self.state).sessions_closed += 1;
        }
        Ok(())
    }
}
