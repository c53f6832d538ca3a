//! Dedup planning
//!
//! For each destination table the planner makes sure the table exists, reads
//! the keys already recorded there and splits the routed objects into those
//! still to transfer, those already present and those over their pattern's
//! size ceiling. Plans are fixed before any transfer starts.

use crate::core::catalog::CandidateObject;
use crate::core::router::RoutedObject;
use crate::error::{IngestError, Result};
use crate::warehouse::WarehouseSession;

/// What one table will receive this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    pub table: String,
    /// Not yet recorded, in key order
    pub transfers: Vec<RoutedObject>,
    /// Already recorded, in key order
    pub duplicates: Vec<CandidateObject>,
    /// Not recorded but larger than the pattern allows, in key order
    pub policy_skips: Vec<CandidateObject>,
}

impl TablePlan {
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty() && self.duplicates.is_empty() && self.policy_skips.is_empty()
    }

    /// Bytes the transfers would move
    pub fn planned_bytes(&self) -> u64 {
        self.transfers.iter().map(|r| r.object.size).sum()
    }
}

/// A table that could not be planned; its objects are not attempted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanningFailure {
    pub table: String,
    pub message: String,
    /// Objects routed to the table
    pub objects: usize,
}

/// Every table's plan, in table order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPlan {
    pub tables: Vec<TablePlan>,
    pub failures: Vec<PlanningFailure>,
}

impl TransferPlan {
    pub fn transfer_count(&self) -> usize {
        self.tables.iter().map(|t| t.transfers.len()).sum()
    }

    pub fn duplicate_count(&self) -> usize {
        self.tables.iter().map(|t| t.duplicates.len()).sum()
    }

    pub fn policy_skip_count(&self) -> usize {
        self.tables.iter().map(|t| t.policy_skips.len()).sum()
    }
}

/// Plan one table
///
/// `routed` must be in key order, as produced by the router; the order is
/// kept in every part of the plan. A recorded key is a duplicate even when it
/// is also over the ceiling.
pub async fn plan_table(
    session: &dyn WarehouseSession,
    table: &str,
    routed: Vec<RoutedObject>,
) -> Result<TablePlan> {
    let planning_error = |message: String| IngestError::Planning {
        table: table.to_string(),
        message,
    };

    session
        .ensure_table(table)
        .await
        .map_err(|e| planning_error(format!("table setup failed: {}", e)))?;

    let existing = session
        .query_distinct_keys(table)
        .await
        .map_err(|e| planning_error(format!("dedup query failed: {}", e)))?;

    let (duplicates, fresh): (Vec<RoutedObject>, Vec<RoutedObject>) = routed
        .into_iter()
        .partition(|r| existing.contains(&r.object.key));

    let (policy_skips, transfers): (Vec<RoutedObject>, Vec<RoutedObject>) = fresh
        .into_iter()
        .partition(|r| r.policy.exceeds_ceiling(r.object.size));

    tracing::debug!(
        table,
        existing = existing.len(),
        transfers = transfers.len(),
        duplicates = duplicates.len(),
        policy_skips = policy_skips.len(),
        "Planned table"
    );

    Ok(TablePlan {
        table: table.to_string(),
        transfers,
        duplicates: duplicates.into_iter().map(|r| r.object).collect(),
        policy_skips: policy_skips.into_iter().map(|r| r.object).collect(),
    })
}
