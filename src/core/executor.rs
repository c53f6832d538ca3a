//! Transfer executor: moves one planned object into its table.
//!
//! The executor enforces the pattern's size ceiling, picks a strategy, reads
//! from the object store and writes one row through the warehouse session.
//! Every call yields exactly one [`TransferOutcome`]; errors never escape as
//! `Err` because a failed object must not stop its siblings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::ObjectStore;
use crate::core::catalog::CandidateObject;
use crate::core::router::RoutedObject;
use crate::core::strategy::{StrategySelector, TransferStrategy};
use crate::error::{IngestError, Result};
use crate::warehouse::{FileRecord, WarehouseSession};

/// Final state of one object in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Copied,
    SkippedDuplicate,
    SkippedPolicy,
    Failed,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Copied => write!(f, "copied"),
            TransferStatus::SkippedDuplicate => write!(f, "skipped_duplicate"),
            TransferStatus::SkippedPolicy => write!(f, "skipped_policy"),
            TransferStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of handling one object. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub key: String,
    pub table: String,
    pub status: TransferStatus,
    pub error: Option<String>,
    /// Bytes written (0 unless copied)
    pub bytes: u64,
    pub strategy: Option<TransferStrategy>,
    pub duration: Duration,
}

impl TransferOutcome {
    /// Outcome for an object the planner found already recorded
    pub fn duplicate(table: &str, object: &CandidateObject) -> Self {
        Self {
            key: object.key.clone(),
            table: table.to_string(),
            status: TransferStatus::SkippedDuplicate,
            error: None,
            bytes: 0,
            strategy: None,
            duration: Duration::ZERO,
        }
    }

    /// Outcome for an object over its pattern's size ceiling
    pub fn policy_skip(table: &str, object: &CandidateObject) -> Self {
        Self {
            status: TransferStatus::SkippedPolicy,
            ..Self::duplicate(table, object)
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == TransferStatus::Failed
    }
}

/// Executes planned transfers against one store and one warehouse session
#[derive(Clone)]
pub struct TransferExecutor {
    store: Arc<dyn ObjectStore>,
    session: Arc<dyn WarehouseSession>,
    selector: StrategySelector,
}

impl TransferExecutor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        session: Arc<dyn WarehouseSession>,
        stream_threshold: u64,
    ) -> Self {
        Self {
            store,
            session,
            selector: StrategySelector::new(stream_threshold),
        }
    }

    pub fn selector(&self) -> &StrategySelector {
        &self.selector
    }

    /// Handle one object. One attempt, no retries.
    ///
    /// The planner already sets aside objects over their ceiling; the check
    /// here covers objects handed in without a plan.
    pub async fn execute(&self, table: &str, routed: &RoutedObject) -> TransferOutcome {
        let start = Instant::now();
        let object = &routed.object;

        if routed.policy.exceeds_ceiling(object.size) {
            tracing::info!(
                table,
                key = %object.key,
                size = object.size,
                max_file_size = routed.policy.max_file_size,
                "Skipping object over size ceiling"
            );
            return TransferOutcome {
                duration: start.elapsed(),
                ..TransferOutcome::policy_skip(table, object)
            };
        }

        let strategy = self
            .selector
            .select(object.size, routed.policy.processing_mode);

        let result = match strategy {
            TransferStrategy::Buffered => self.transfer_buffered(table, object).await,
            TransferStrategy::Streamed => self.transfer_streamed(table, object).await,
        };

        let duration = start.elapsed();
        match result {
            Ok(bytes) => {
                tracing::debug!(
                    table,
                    key = %object.key,
                    size = bytes,
                    %strategy,
                    elapsed_ms = duration.as_millis() as u64,
                    "Copied"
                );
                TransferOutcome {
                    key: object.key.clone(),
                    table: table.to_string(),
                    status: TransferStatus::Copied,
                    error: None,
                    bytes,
                    strategy: Some(strategy),
                    duration,
                }
            }
            Err(e) => {
                tracing::error!(table, key = %object.key, %strategy, error = %e, "Transfer failed");
                TransferOutcome {
                    key: object.key.clone(),
                    table: table.to_string(),
                    status: TransferStatus::Failed,
                    error: Some(e.to_string()),
                    bytes: 0,
                    strategy: Some(strategy),
                    duration,
                }
            }
        }
    }

    async fn transfer_buffered(&self, table: &str, object: &CandidateObject) -> Result<u64> {
        let failed = |message: String| IngestError::Transfer {
            key: object.key.clone(),
            message,
        };

        let content = self
            .store
            .get_object(&object.key)
            .await
            .map_err(|e| failed(format!("read failed: {}", e)))?;

        let actual = content.len() as u64;
        if actual != object.size {
            return Err(failed(format!(
                "listed size {} bytes but read {} bytes",
                object.size, actual
            )));
        }

        let record = FileRecord::for_key(&object.key, object.size);
        self.session
            .insert_buffered(table, &record, content)
            .await
            .map_err(|e| failed(format!("write failed: {}", e)))?;

        Ok(actual)
    }

    async fn transfer_streamed(&self, table: &str, object: &CandidateObject) -> Result<u64> {
        let failed = |message: String| IngestError::Transfer {
            key: object.key.clone(),
            message,
        };

        let stream = self
            .store
            .open_stream(&object.key)
            .await
            .map_err(|e| failed(format!("read failed: {}", e)))?;

        let record = FileRecord::for_key(&object.key, object.size);
        self.session
            .insert_streamed(table, &record, stream)
            .await
            .map_err(|e| failed(format!("write failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryObjectStore;
    use crate::config::ProcessingMode;
    use crate::core::router::TransferPolicy;
    use crate::warehouse::{MemoryWarehouse, Warehouse};

    async fn setup(threshold: u64) -> (MemoryObjectStore, MemoryWarehouse, TransferExecutor) {
        let store = MemoryObjectStore::new().with_chunk_size(4);
        let warehouse = MemoryWarehouse::new();
        let session: Arc<dyn WarehouseSession> = Arc::from(warehouse.connect().await.unwrap());
        session.ensure_table("T").await.unwrap();
        let executor = TransferExecutor::new(Arc::new(store.clone()), session, threshold);
        (store, warehouse, executor)
    }

    fn routed(key: &str, size: u64, max: u64, mode: ProcessingMode) -> RoutedObject {
        RoutedObject {
            object: CandidateObject::new(key, size),
            policy: TransferPolicy {
                max_file_size: max,
                processing_mode: mode,
            },
        }
    }

    #[tokio::test]
    async fn test_small_object_buffered() {
        let (store, warehouse, executor) = setup(10).await;
        store.put("a.csv", "123");

        let outcome = executor
            .execute("T", &routed("a.csv", 3, 0, ProcessingMode::Auto))
            .await;
        assert_eq!(outcome.status, TransferStatus::Copied);
        assert_eq!(outcome.strategy, Some(TransferStrategy::Buffered));
        assert_eq!(outcome.bytes, 3);

        let rows = warehouse.rows("T");
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].streamed);
        assert_eq!(rows[0].content.as_ref(), b"123");
    }

    #[tokio::test]
    async fn test_threshold_sized_object_streams() {
        let (store, warehouse, executor) = setup(10).await;
        store.put_sized("big.bin", 10);

        let outcome = executor
            .execute("T", &routed("big.bin", 10, 0, ProcessingMode::Auto))
            .await;
        assert_eq!(outcome.status, TransferStatus::Copied);
        assert_eq!(outcome.strategy, Some(TransferStrategy::Streamed));
        assert!(warehouse.rows("T")[0].streamed);
    }

    #[tokio::test]
    async fn test_ceiling_skips_without_touching_warehouse() {
        let (store, warehouse, executor) = setup(10).await;
        store.put_sized("b.csv", 6);

        let outcome = executor
            .execute("T", &routed("b.csv", 6, 5, ProcessingMode::Auto))
            .await;
        assert_eq!(outcome.status, TransferStatus::SkippedPolicy);
        assert!(outcome.error.is_none());
        assert!(outcome.strategy.is_none());
        assert_eq!(warehouse.total_rows(), 0);
    }

    #[tokio::test]
    async fn test_size_equal_to_ceiling_is_copied() {
        let (store, _warehouse, executor) = setup(10).await;
        store.put_sized("c.csv", 5);

        let outcome = executor
            .execute("T", &routed("c.csv", 5, 5, ProcessingMode::Auto))
            .await;
        assert_eq!(outcome.status, TransferStatus::Copied);
    }

    #[tokio::test]
    async fn test_forced_mode_overrides_threshold() {
        let (store, warehouse, executor) = setup(1000).await;
        store.put("tiny", "x");

        let outcome = executor
            .execute("T", &routed("tiny", 1, 0, ProcessingMode::Streamed))
            .await;
        assert_eq!(outcome.strategy, Some(TransferStrategy::Streamed));
        assert!(warehouse.rows("T")[0].streamed);
    }

    #[tokio::test]
    async fn test_read_failure_is_recorded() {
        let (store, warehouse, executor) = setup(10).await;
        store.put("bad", "1");
        store.fail_reads_for("bad");

        let outcome = executor
            .execute("T", &routed("bad", 1, 0, ProcessingMode::Auto))
            .await;
        assert_eq!(outcome.status, TransferStatus::Failed);
        assert!(outcome.error.unwrap().contains("read failed"));
        assert_eq!(warehouse.total_rows(), 0);
    }

    #[tokio::test]
    async fn test_size_mismatch_fails_buffered() {
        let (store, warehouse, executor) = setup(100).await;
        store.put("grew", "12345");

        let outcome = executor
            .execute("T", &routed("grew", 3, 0, ProcessingMode::Auto))
            .await;
        assert!(outcome.is_failure());
        assert_eq!(warehouse.total_rows(), 0);
    }

    #[tokio::test]
    async fn test_size_mismatch_fails_streamed() {
        let (store, warehouse, executor) = setup(1).await;
        store.put("shrunk", "12");

        let outcome = executor
            .execute("T", &routed("shrunk", 8, 0, ProcessingMode::Auto))
            .await;
        assert!(outcome.is_failure());
        assert_eq!(outcome.bytes, 0);
        assert_eq!(warehouse.total_rows(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_is_recorded() {
        let (store, warehouse, executor) = setup(10).await;
        store.put("a", "1");
        warehouse.fail_inserts_for("a");

        let outcome = executor
            .execute("T", &routed("a", 1, 0, ProcessingMode::Auto))
            .await;
        assert_eq!(outcome.status, TransferStatus::Failed);
        assert!(outcome.error.unwrap().contains("write failed"));
    }

    #[test]
    fn test_duplicate_outcome() {
        let outcome = TransferOutcome::duplicate("T", &CandidateObject::new("k", 9));
        assert_eq!(outcome.status, TransferStatus::SkippedDuplicate);
        assert_eq!(outcome.bytes, 0);
        assert_eq!(outcome.status.to_string(), "skipped_duplicate");
    }
}
