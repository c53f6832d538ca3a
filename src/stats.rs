/*!
 * Run statistics: per-table and total outcome counts
 */

use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::executor::{TransferOutcome, TransferStatus};
use crate::core::planner::PlanningFailure;
use crate::error::{EXIT_PARTIAL, EXIT_SUCCESS};

/// Outcome counts for one table (or the whole run)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub copied: u64,
    pub skipped_duplicate: u64,
    pub skipped_policy: u64,
    pub failed: u64,
    pub bytes_copied: u64,
}

impl TableCounts {
    /// Duplicates and policy skips together
    pub fn skipped(&self) -> u64 {
        self.skipped_duplicate + self.skipped_policy
    }

    pub fn total(&self) -> u64 {
        self.copied + self.skipped() + self.failed
    }

    pub fn record(&mut self, status: TransferStatus, bytes: u64) {
        match status {
            TransferStatus::Copied => {
                self.copied += 1;
                self.bytes_copied += bytes;
            }
            TransferStatus::SkippedDuplicate => self.skipped_duplicate += 1,
            TransferStatus::SkippedPolicy => self.skipped_policy += 1,
            TransferStatus::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &TableCounts) {
        self.copied += other.copied;
        self.skipped_duplicate += other.skipped_duplicate;
        self.skipped_policy += other.skipped_policy;
        self.failed += other.failed;
        self.bytes_copied += other.bytes_copied;
    }
}

/// Everything a run produced, for the summary table and the exit code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tables: BTreeMap<String, TableCounts>,
    pub planning_failures: Vec<PlanningFailure>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a planned table shows up even if it saw no objects
    pub fn touch_table(&mut self, table: &str) {
        self.tables.entry(table.to_string()).or_default();
    }

    pub fn record(&mut self, outcome: &TransferOutcome) {
        self.tables
            .entry(outcome.table.clone())
            .or_default()
            .record(outcome.status, outcome.bytes);
    }

    pub fn record_planning_failure(&mut self, failure: PlanningFailure) {
        self.planning_failures.push(failure);
    }

    pub fn totals(&self) -> TableCounts {
        let mut totals = TableCounts::default();
        for counts in self.tables.values() {
            totals.merge(counts);
        }
        totals
    }

    pub fn table(&self, name: &str) -> TableCounts {
        self.tables.get(name).copied().unwrap_or_default()
    }

    /// Any object failed or any table could not be planned
    pub fn has_failures(&self) -> bool {
        !self.planning_failures.is_empty() || self.totals().failed > 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            EXIT_PARTIAL
        } else {
            EXIT_SUCCESS
        }
    }
}

/// Fold outcomes into a summary. Pure accumulation; never fails.
pub fn aggregate<'a, I>(outcomes: I) -> RunSummary
where
    I: IntoIterator<Item = &'a TransferOutcome>,
{
    let mut summary = RunSummary::new();
    for outcome in outcomes {
        summary.record(outcome);
    }
    summary
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut exp = 0;
    while value >= 1024.0 && exp < UNITS.len() - 1 {
        value /= 1024.0;
        exp += 1;
    }

    if exp == 0 {
        format!("{} {}", bytes, UNITS[exp])
    } else {
        format!("{:.2} {}", value, UNITS[exp])
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis() as u64;
    if ms < 1000 {
        return format!("{}ms", ms);
    }

    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes % 60, seconds % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}
