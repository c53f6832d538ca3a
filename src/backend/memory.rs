//! In-memory object store
//!
//! Backs tests and dry runs. Failures can be injected per key, for listing,
//! or for the whole store.

use super::error::{BackendError, BackendResult};
use super::{ListStream, ObjectEntry, ObjectStore, ReadStream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

const BACKEND: &str = "memory";

/// Default chunk size for streamed reads; small so tests see several chunks
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Bytes>,
    /// Sizes reported by listing that differ from the stored content
    listed_sizes: BTreeMap<String, u64>,
    failing_reads: HashSet<String>,
    fail_listing_after: Option<usize>,
    unreachable: bool,
}

/// Object store held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    state: Arc<RwLock<State>>,
    chunk_size: usize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn read_state(&self) -> BackendResult<std::sync::RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| BackendError::Other {
            backend: BACKEND.to_string(),
            message: "state lock poisoned".to_string(),
        })
    }

    fn write_state(&self) -> BackendResult<std::sync::RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| BackendError::Other {
            backend: BACKEND.to_string(),
            message: "state lock poisoned".to_string(),
        })
    }

    /// Store an object, replacing any previous content
    pub fn put(&self, key: impl Into<String>, content: impl Into<Bytes>) {
        if let Ok(mut state) = self.write_state() {
            state.objects.insert(key.into(), content.into());
        }
    }

    /// Store an object of `size` filler bytes
    pub fn put_sized(&self, key: impl Into<String>, size: usize) {
        let key = key.into();
        let filler = key.bytes().next().unwrap_or(b'x');
        self.put(key, vec![filler; size]);
    }

    /// Make listing report `size` for `key` regardless of its content
    pub fn misreport_size(&self, key: impl Into<String>, size: u64) {
        if let Ok(mut state) = self.write_state() {
            state.listed_sizes.insert(key.into(), size);
        }
    }

    /// Every read of `key` fails from now on
    pub fn fail_reads_for(&self, key: impl Into<String>) {
        if let Ok(mut state) = self.write_state() {
            state.failing_reads.insert(key.into());
        }
    }

    /// Listing yields `entries` objects and then an error
    pub fn fail_listing_after(&self, entries: usize) {
        if let Ok(mut state) = self.write_state() {
            state.fail_listing_after = Some(entries);
        }
    }

    /// Connection tests and every operation fail
    pub fn set_unreachable(&self, unreachable: bool) {
        if let Ok(mut state) = self.write_state() {
            state.unreachable = unreachable;
        }
    }

    fn check_reachable(state: &State) -> BackendResult<()> {
        if state.unreachable {
            return Err(BackendError::ConnectionFailed {
                backend: BACKEND.to_string(),
                endpoint: "memory://".to_string(),
                source: None,
            });
        }
        Ok(())
    }

    fn content(&self, key: &str) -> BackendResult<Bytes> {
        let state = self.read_state()?;
        Self::check_reachable(&state)?;
        if state.failing_reads.contains(key) {
            return Err(BackendError::Network {
                message: format!("injected read failure for {}", key),
                source: None,
            });
        }
        state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                key: key.to_string(),
                backend: BACKEND.to_string(),
            })
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn test_connection(&self) -> BackendResult<()> {
        let state = self.read_state()?;
        Self::check_reachable(&state)
    }

    async fn list_with_prefix(&self, prefix: &str) -> BackendResult<ListStream> {
        let state = self.read_state()?;
        Self::check_reachable(&state)?;

        let mut items: Vec<BackendResult<ObjectEntry>> = state
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, content)| {
                let size = state
                    .listed_sizes
                    .get(key)
                    .copied()
                    .unwrap_or(content.len() as u64);
                Ok(ObjectEntry::new(key.clone(), size))
            })
            .collect();

        if let Some(limit) = state.fail_listing_after {
            items.truncate(limit);
            items.push(Err(BackendError::Network {
                message: "injected listing failure".to_string(),
                source: None,
            }));
        }

        Ok(stream::iter(items).boxed())
    }

    async fn get_object(&self, key: &str) -> BackendResult<Bytes> {
        self.content(key)
    }

    async fn open_stream(&self, key: &str) -> BackendResult<ReadStream> {
        let content = self.content(key)?;
        let chunk_size = self.chunk_size;
        let chunks: Vec<std::io::Result<Bytes>> = (0..content.len())
            .step_by(chunk_size)
            .map(|start| {
                let end = (start + chunk_size).min(content.len());
                Ok(content.slice(start..end))
            })
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let state = self.read_state()?;
        Self::check_reachable(&state)?;
        Ok(state.objects.contains_key(key))
    }

    async fn size(&self, key: &str) -> BackendResult<u64> {
        Ok(self.content(key)?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_put_and_list() {
        let store = MemoryObjectStore::new();
        store.put("in/b.csv", "bb");
        store.put("in/a.csv", "a");
        store.put("out/c.csv", "ccc");

        let entries: Vec<ObjectEntry> = store
            .list_with_prefix("in/")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            entries,
            vec![ObjectEntry::new("in/a.csv", 1), ObjectEntry::new("in/b.csv", 2)]
        );
    }

    #[tokio::test]
    async fn test_stream_chunks() {
        let store = MemoryObjectStore::new().with_chunk_size(3);
        store.put("k", "abcdefgh");

        let chunks: Vec<Bytes> = store.open_stream("k").await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), b"abcdefgh");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryObjectStore::new();
        store.put("a", "1");
        store.put("b", "2");
        store.fail_reads_for("a");
        assert!(store.get_object("a").await.is_err());
        assert!(store.get_object("b").await.is_ok());

        store.fail_listing_after(1);
        let listed: BackendResult<Vec<ObjectEntry>> =
            store.list_with_prefix("").await.unwrap().try_collect().await;
        assert!(listed.is_err());

        store.set_unreachable(true);
        assert!(store.test_connection().await.is_err());
    }

    #[tokio::test]
    async fn test_misreported_size() {
        let store = MemoryObjectStore::new();
        store.put("a", "12345");
        store.misreport_size("a", 9);
        let entries: Vec<ObjectEntry> = store
            .list_with_prefix("")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(entries[0].size, 9);
        assert_eq!(store.size("a").await.unwrap(), 5);
    }
}
