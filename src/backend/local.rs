//! Local directory treated as a bucket
//!
//! Keys are paths relative to the root joined with `/`. Listing walks the
//! tree with `walkdir` on a blocking thread and yields entries sorted by key.

use super::error::{BackendError, BackendResult};
use super::{chunked, ListStream, ObjectEntry, ObjectStore, ReadStream, CHUNK_SIZE};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

const BACKEND: &str = "local";

/// Object store over a local directory
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key onto the filesystem, refusing anything that leaves the root
    fn resolve_key(&self, key: &str) -> BackendResult<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return Err(BackendError::InvalidKey {
                key: key.to_string(),
                reason: "key must be a relative path inside the store root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn not_found_or(key: &str, err: std::io::Error) -> BackendError {
        if err.kind() == std::io::ErrorKind::NotFound {
            BackendError::NotFound {
                key: key.to_string(),
                backend: BACKEND.to_string(),
            }
        } else {
            BackendError::from(err)
        }
    }
}

/// Relative path of `path` under `root` as a `/`-joined key
fn key_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

fn walk(root: &Path, prefix: &str) -> BackendResult<Vec<ObjectEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            BackendError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(key) = key_for(root, entry.path()) else {
            tracing::warn!(path = %entry.path().display(), "Skipping file with non UTF-8 name");
            continue;
        };
        if !key.starts_with(prefix) {
            continue;
        }
        let size = entry.metadata().map_err(|e| {
            BackendError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("metadata unavailable")),
            )
        })?;
        entries.push(ObjectEntry::new(key, size.len()));
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn test_connection(&self) -> BackendResult<()> {
        let meta = fs::metadata(&self.root)
            .await
            .map_err(|e| BackendError::ConnectionFailed {
                backend: BACKEND.to_string(),
                endpoint: self.root.display().to_string(),
                source: Some(Box::new(e)),
            })?;
        if !meta.is_dir() {
            return Err(BackendError::InvalidConfig {
                backend: BACKEND.to_string(),
                message: format!("{} is not a directory", self.root.display()),
            });
        }
        Ok(())
    }

    async fn list_with_prefix(&self, prefix: &str) -> BackendResult<ListStream> {
        let root = self.root.clone();
        let prefix = prefix.trim_start_matches('/').to_string();

        let entries = tokio::task::spawn_blocking(move || walk(&root, &prefix))
            .await
            .map_err(|e| BackendError::Other {
                backend: BACKEND.to_string(),
                message: format!("listing task failed: {}", e),
            })??;

        Ok(stream::iter(entries.into_iter().map(Ok)).boxed())
    }

    async fn get_object(&self, key: &str) -> BackendResult<Bytes> {
        let path = self.resolve_key(key)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| Self::not_found_or(key, e))?;
        Ok(Bytes::from(data))
    }

    async fn open_stream(&self, key: &str) -> BackendResult<ReadStream> {
        let path = self.resolve_key(key)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| Self::not_found_or(key, e))?;
        Ok(chunked(file, CHUNK_SIZE))
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let path = self.resolve_key(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BackendError::from(e)),
        }
    }

    async fn size(&self, key: &str) -> BackendResult<u64> {
        let path = self.resolve_key(key)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found_or(key, e))?;
        Ok(meta.len())
    }
}
