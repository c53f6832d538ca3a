/*!
 * Orbit Ingest - object store to warehouse transfer engine
 *
 * Lists objects under a prefix, routes each key to a destination table by
 * glob-like patterns, skips keys the table already holds and copies the rest
 * as one row per object:
 * - Pattern routing with per-pattern size ceilings
 * - Key-based dedup, so re-running a job is safe
 * - Buffered or streamed transfer chosen by size
 * - Optional bounded concurrency
 * - JSON Lines audit log
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod audit;
pub mod backend;
pub mod cli_style;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod stats;
pub mod warehouse;

// Re-export commonly used types
pub use backend::{ObjectStore, ObjectEntry};
pub use config::{FilePattern, IngestConfig, ProcessingMode};
pub use core::{Orchestrator, RunReport, TransferOutcome, TransferStatus};
pub use error::{IngestError, Result};
pub use stats::{aggregate, RunSummary};
pub use warehouse::{Warehouse, WarehouseSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
