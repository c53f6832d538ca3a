//! Object catalog: the full candidate set for one run

use futures::TryStreamExt;

use crate::backend::{ObjectEntry, ObjectStore};
use crate::error::{IngestError, Result};

/// An object seen in the listing. Built fresh every run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateObject {
    pub key: String,
    pub size: u64,
}

impl CandidateObject {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

impl From<ObjectEntry> for CandidateObject {
    fn from(entry: ObjectEntry) -> Self {
        Self {
            key: entry.key,
            size: entry.size,
        }
    }
}

/// Page through every object under `prefix`
///
/// A listing that fails part way is a connectivity failure: acting on half a
/// catalog would make the run's outcome depend on where the listing broke.
pub async fn read_catalog(store: &dyn ObjectStore, prefix: &str) -> Result<Vec<CandidateObject>> {
    let stream = store
        .list_with_prefix(prefix)
        .await
        .map_err(IngestError::store_unreachable)?;

    let objects: Vec<CandidateObject> = stream
        .map_ok(CandidateObject::from)
        .try_collect()
        .await
        .map_err(IngestError::store_unreachable)?;

    tracing::info!(
        store = store.name(),
        prefix,
        objects = objects.len(),
        "Catalog listed"
    );

    Ok(objects)
}
