//! Run orchestration
//!
//! Wires catalog, router, planner and executor together for one run. The
//! orchestrator owns the warehouse session: it is opened after the object
//! store answers and closed on every exit path, including errors.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::audit::AuditLogger;
use crate::backend::{open_object_store, ObjectStore};
use crate::config::IngestConfig;
use crate::core::catalog::read_catalog;
use crate::core::executor::{TransferExecutor, TransferOutcome, TransferStatus};
use crate::core::planner::{plan_table, PlanningFailure, TransferPlan};
use crate::core::router::{RoutedObject, Router};
use crate::error::{IngestError, Result};
use crate::logging::run_span;
use crate::stats::RunSummary;
use crate::warehouse::{open_warehouse, Warehouse, WarehouseSession};

/// Summary plus every individual outcome, sorted by table then key
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub summary: RunSummary,
    pub outcomes: Vec<TransferOutcome>,
}

pub struct Orchestrator {
    config: IngestConfig,
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    router: Router,
    audit: Option<AuditLogger>,
}

impl Orchestrator {
    /// Validate the configuration and compile the routing rules
    ///
    /// An audit log that cannot be opened is reported and skipped.
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Result<Self> {
        config.validate()?;
        let router = Router::new(&config.patterns, config.default_table.clone())?;

        let audit = match config.audit_log_path {
            Some(ref path) => match AuditLogger::new(path) {
                Ok(logger) => Some(logger),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Audit log disabled");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            config,
            store,
            warehouse,
            router,
            audit,
        })
    }

    /// Build the collaborators named in the configuration
    pub async fn from_config(config: IngestConfig) -> Result<Self> {
        config.validate()?;
        let store = open_object_store(&config.source).await?;
        let warehouse = open_warehouse(&config.warehouse)?;
        Self::new(config, store, warehouse)
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Connection tests against both collaborators. Writes nothing.
    pub async fn check(&self) -> Result<()> {
        let session = self.open_session().await?;
        self.close_session(session.as_ref()).await;
        tracing::info!(
            store = self.store.name(),
            warehouse = self.warehouse.name(),
            "Connectivity check passed"
        );
        Ok(())
    }

    /// Route and dedup without writing rows. Missing tables are created.
    pub async fn plan(&self) -> Result<TransferPlan> {
        let session = self.open_session().await?;
        let result = self.build_plan(session.as_ref()).await;
        self.close_session(session.as_ref()).await;
        result
    }

    pub async fn run(&self) -> Result<RunSummary> {
        Ok(self.run_report().await?.summary)
    }

    /// Execute the whole pipeline once
    ///
    /// Connectivity problems fail the run before anything is written. Once
    /// planning starts, failures are scoped to a table or an object and end
    /// up in the summary instead.
    pub async fn run_report(&self) -> Result<RunReport> {
        let start = Instant::now();
        let run_id = new_run_id();

        tracing::info!(
            run_id = %run_id,
            source = %self.config.source.describe(),
            warehouse = self.warehouse.name(),
            rules = self.router.rule_count(),
            "Starting ingest run"
        );

        let span = run_span(&run_id);
        let session = self.open_session().instrument(span.clone()).await?;
        let result = self
            .execute(Arc::clone(&session), &run_id)
            .instrument(span.clone())
            .await;
        self.close_session(session.as_ref()).instrument(span).await;

        let (mut summary, outcomes) = result?;
        summary.duration = start.elapsed();

        let totals = summary.totals();
        tracing::info!(
            run_id = %run_id,
            copied = totals.copied,
            skipped_duplicate = totals.skipped_duplicate,
            skipped_policy = totals.skipped_policy,
            failed = totals.failed,
            planning_failures = summary.planning_failures.len(),
            bytes = totals.bytes_copied,
            "Ingest run finished"
        );

        Ok(RunReport {
            run_id,
            summary,
            outcomes,
        })
    }

    /// Store probe, then warehouse connect and probe
    async fn open_session(&self) -> Result<Arc<dyn WarehouseSession>> {
        self.store
            .test_connection()
            .await
            .map_err(IngestError::store_unreachable)?;

        let session: Arc<dyn WarehouseSession> = Arc::from(
            self.warehouse
                .connect()
                .await
                .map_err(IngestError::warehouse_unreachable)?,
        );

        if let Err(e) = session.test_connection().await {
            self.close_session(session.as_ref()).await;
            return Err(IngestError::warehouse_unreachable(e));
        }

        Ok(session)
    }

    async fn close_session(&self, session: &dyn WarehouseSession) {
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Failed to close warehouse session");
        }
    }

    async fn build_plan(&self, session: &dyn WarehouseSession) -> Result<TransferPlan> {
        let candidates = read_catalog(self.store.as_ref(), self.config.source.prefix()).await?;
        let routing = self.router.route(&candidates);

        let mut plan = TransferPlan::default();
        for (table, routed) in routing {
            let objects = routed.len();
            match plan_table(session, &table, routed).await {
                Ok(table_plan) => plan.tables.push(table_plan),
                Err(e) => {
                    tracing::error!(table = %table, objects, error = %e, "Table abandoned");
                    plan.failures.push(PlanningFailure {
                        table,
                        message: e.to_string(),
                        objects,
                    });
                }
            }
        }

        tracing::info!(
            candidates = candidates.len(),
            tables = plan.tables.len(),
            transfers = plan.transfer_count(),
            duplicates = plan.duplicate_count(),
            policy_skips = plan.policy_skip_count(),
            "Plan ready"
        );
        Ok(plan)
    }

    async fn execute(
        &self,
        session: Arc<dyn WarehouseSession>,
        run_id: &str,
    ) -> Result<(RunSummary, Vec<TransferOutcome>)> {
        let plan = self.build_plan(session.as_ref()).await?;

        let mut summary = RunSummary::new();
        let mut outcomes = Vec::new();
        let mut jobs = Vec::new();

        for table_plan in plan.tables {
            summary.touch_table(&table_plan.table);
            for duplicate in &table_plan.duplicates {
                tracing::debug!(table = %table_plan.table, key = %duplicate.key, "Already loaded");
                outcomes.push(TransferOutcome::duplicate(&table_plan.table, duplicate));
            }
            for skipped in &table_plan.policy_skips {
                tracing::info!(
                    table = %table_plan.table,
                    key = %skipped.key,
                    size = skipped.size,
                    "Skipping object over size ceiling"
                );
                outcomes.push(TransferOutcome::policy_skip(&table_plan.table, skipped));
            }
            for routed in table_plan.transfers {
                jobs.push((table_plan.table.clone(), routed));
            }
        }
        for failure in plan.failures {
            summary.record_planning_failure(failure);
        }

        let executor = TransferExecutor::new(
            Arc::clone(&self.store),
            session,
            self.config.stream_threshold,
        );

        let workers = self.config.parallel.max(1);
        if workers == 1 {
            for (table, routed) in &jobs {
                outcomes.push(executor.execute(table, routed).await);
            }
        } else {
            outcomes.extend(run_pool(executor, jobs, workers).await?);
        }

        outcomes.sort_by(|a, b| (&a.table, &a.key).cmp(&(&b.table, &b.key)));

        for outcome in &outcomes {
            summary.record(outcome);
            self.audit(run_id, outcome);
        }

        Ok((summary, outcomes))
    }

    fn audit(&self, run_id: &str, outcome: &TransferOutcome) {
        if let Some(ref logger) = self.audit {
            if let Err(e) = logger.emit_outcome(run_id, outcome) {
                tracing::warn!(key = %outcome.key, error = %e, "Failed to write audit entry");
            }
        }
    }
}

/// Bounded worker pool; each task hands its outcome back to the caller
async fn run_pool(
    executor: TransferExecutor,
    jobs: Vec<(String, RoutedObject)>,
    workers: usize,
) -> Result<Vec<TransferOutcome>> {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut join_set = JoinSet::new();
    let mut pending: HashSet<(String, String)> = HashSet::new();

    for (table, routed) in jobs {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| IngestError::Other(format!("worker pool closed: {}", e)))?;
        pending.insert((table.clone(), routed.object.key.clone()));

        let executor = executor.clone();
        join_set.spawn(async move {
            let outcome = executor.execute(&table, &routed).await;
            drop(permit);
            outcome
        });
    }

    let mut outcomes = Vec::with_capacity(pending.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(outcome) => {
                pending.remove(&(outcome.table.clone(), outcome.key.clone()));
                outcomes.push(outcome);
            }
            Err(e) => tracing::error!(error = %e, "Transfer task aborted"),
        }
    }

    // A task that panicked still owes its object an outcome
    for (table, key) in pending {
        outcomes.push(TransferOutcome {
            key,
            table,
            status: TransferStatus::Failed,
            error: Some("transfer task aborted".to_string()),
            bytes: 0,
            strategy: None,
            duration: Duration::ZERO,
        });
    }

    Ok(outcomes)
}

fn new_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ"))
}
