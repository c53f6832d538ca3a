//! Object store abstraction
//!
//! The ingest pipeline reads from an object store through the [`ObjectStore`]
//! trait: a flat key space listed by prefix, with buffered and chunked reads.
//! Implementations cover S3 (feature `s3-native`), a local directory treated
//! as a bucket, and an in-memory store used by tests and dry runs.

pub mod error;
mod local;
mod memory;

#[cfg(feature = "s3-native")]
mod s3;

pub use error::{BackendError, BackendResult};
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

#[cfg(feature = "s3-native")]
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::SourceConfig;
use crate::error::Result;

/// Chunk size for streamed reads (1 MiB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Chunked object content
pub type ReadStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Lazily paginated listing
pub type ListStream = Pin<Box<dyn Stream<Item = BackendResult<ObjectEntry>> + Send>>;

/// One listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

impl ObjectEntry {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// Read-side contract the pipeline needs from an object store
///
/// Implementors must be `Send + Sync`; the executor shares one store across
/// concurrent transfers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// Cheap reachability probe run before anything else
    async fn test_connection(&self) -> BackendResult<()>;

    /// List every object whose key starts with `prefix`
    ///
    /// Pages are fetched as the stream is polled. An error item means the
    /// listing is incomplete.
    async fn list_with_prefix(&self, prefix: &str) -> BackendResult<ListStream>;

    /// Fetch a whole object into memory
    async fn get_object(&self, key: &str) -> BackendResult<Bytes>;

    /// Open a chunked read of an object
    async fn open_stream(&self, key: &str) -> BackendResult<ReadStream>;

    async fn exists(&self, key: &str) -> BackendResult<bool>;

    /// Object size in bytes
    async fn size(&self, key: &str) -> BackendResult<u64>;
}

/// Turn an async reader into a [`ReadStream`] of `chunk_size` pieces.
/// The stream ends after the first read error.
pub(crate) fn chunked<R>(reader: R, chunk_size: usize) -> ReadStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let stream = stream::unfold(
        Some((reader, vec![0u8; chunk_size])),
        |state| async move {
            let (mut reader, mut buffer) = state?;
            match reader.read(&mut buffer).await {
                Ok(0) => None,
                Ok(n) => {
                    let data = Bytes::copy_from_slice(&buffer[..n]);
                    Some((Ok(data), Some((reader, buffer))))
                }
                Err(e) => Some((Err(e), None)),
            }
        },
    );

    Box::pin(stream)
}

/// Build the object store described by the source configuration
pub async fn open_object_store(config: &SourceConfig) -> Result<Arc<dyn ObjectStore>> {
    match config {
        SourceConfig::Local(local) => Ok(Arc::new(LocalObjectStore::new(&local.root))),

        #[cfg(feature = "s3-native")]
        SourceConfig::S3(s3) => {
            let store = S3ObjectStore::connect(s3).await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "s3-native"))]
        SourceConfig::S3(_) => Err(crate::error::IngestError::Config(
            "S3 sources require the 's3-native' feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_chunked_splits_input() {
        let data = vec![7u8; 10];
        let mut stream = chunked(std::io::Cursor::new(data), 4);

        let mut sizes = Vec::new();
        while let Some(chunk) = stream.next().await {
            sizes.push(chunk.unwrap().len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_chunked_empty_reader() {
        let mut stream = chunked(std::io::Cursor::new(Vec::<u8>::new()), 4);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_open_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = SourceConfig::Local(crate::config::LocalSourceConfig {
            root: dir.path().to_path_buf(),
            prefix: String::new(),
        });
        let store = open_object_store(&config).await.unwrap();
        assert_eq!(store.name(), "local");
        store.test_connection().await.unwrap();
    }
}
