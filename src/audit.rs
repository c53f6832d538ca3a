/*!
 * Audit logging for ingest runs
 *
 * One JSON line per transfer outcome, appended to a file, so operators can
 * answer "what happened to this key" after the run is gone.
 *
 * # Example
 *
 * ```no_run
 * use orbit_ingest::audit::{AuditEvent, AuditLogger};
 * use std::path::Path;
 *
 * let logger = AuditLogger::new(Path::new("ingest_audit.jsonl")).unwrap();
 * let event = AuditEvent::new("run-1", "CSV_FILES", "landing/a.csv", "copied").with_bytes(1024);
 * logger.emit(&event).unwrap();
 * ```
 */

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::executor::TransferOutcome;
use crate::error::{IngestError, Result};

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// RFC 3339 timestamp
    pub timestamp: String,

    /// Correlates every event of one run
    pub run_id: String,

    pub table: String,

    pub key: String,

    /// copied, skipped_duplicate, skipped_policy or failed
    pub status: String,

    pub bytes: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    pub duration_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(run_id: &str, table: &str, key: &str, status: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            run_id: run_id.to_string(),
            table: table.to_string(),
            key: key.to_string(),
            status: status.to_string(),
            bytes: 0,
            strategy: None,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = bytes;
        self
    }

    pub fn with_strategy(mut self, strategy: &str) -> Self {
        self.strategy = Some(strategy.to_string());
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Record for one transfer outcome
    pub fn from_outcome(run_id: &str, outcome: &TransferOutcome) -> Self {
        let mut event = Self::new(
            run_id,
            &outcome.table,
            &outcome.key,
            &outcome.status.to_string(),
        )
        .with_bytes(outcome.bytes)
        .with_duration_ms(outcome.duration.as_millis() as u64);

        if let Some(strategy) = outcome.strategy {
            event = event.with_strategy(&strategy.to_string());
        }
        if let Some(ref error) = outcome.error {
            event = event.with_error(error);
        }
        event
    }
}

/// Append-only JSON Lines writer; clones share the file
#[derive(Clone)]
pub struct AuditLogger {
    path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl AuditLogger {
    /// Open or create the log in append mode, creating parent directories
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    IngestError::AuditLog(format!("Failed to create audit log directory: {}", e))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| IngestError::AuditLog(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one event and flush it
    pub fn emit(&self, event: &AuditEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| IngestError::AuditLog("Audit log lock poisoned".to_string()))?;
        writeln!(writer, "{}", json)
            .map_err(|e| IngestError::AuditLog(format!("Failed to write audit log: {}", e)))?;
        writer
            .flush()
            .map_err(|e| IngestError::AuditLog(format!("Failed to flush audit log: {}", e)))?;

        Ok(())
    }

    pub fn emit_outcome(&self, run_id: &str, outcome: &TransferOutcome) -> Result<()> {
        self.emit(&AuditEvent::from_outcome(run_id, outcome))
    }
}

/// Read every event back, skipping blank lines
pub fn read_audit_log(path: &Path) -> Result<Vec<AuditEvent>> {
    let file = File::open(path)
        .map_err(|e| IngestError::AuditLog(format!("Failed to open audit log: {}", e)))?;

    let mut events = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(&line)
            .map_err(|e| IngestError::AuditLog(format!("Malformed audit line: {}", e)))?;
        events.push(event);
    }
    Ok(events)
}
