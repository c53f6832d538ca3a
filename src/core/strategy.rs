//! Transfer strategy selection
//!
//! Small objects are fetched whole and written with one insert. Large objects
//! are streamed chunk by chunk so memory stays bounded regardless of size.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{ProcessingMode, DEFAULT_STREAM_THRESHOLD};

/// How an object is moved into the warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStrategy {
    /// Whole object in memory, single insert
    Buffered,

    /// Chunked read handed to the warehouse as it arrives
    Streamed,
}

impl fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStrategy::Buffered => write!(f, "buffered"),
            TransferStrategy::Streamed => write!(f, "streamed"),
        }
    }
}

/// Chooses a strategy from object size and the pattern's processing mode
#[derive(Debug, Clone, Copy)]
pub struct StrategySelector {
    /// Objects at or above this size stream
    threshold: u64,
}

impl StrategySelector {
    /// # Example
    ///
    /// ```
    /// use orbit_ingest::config::ProcessingMode;
    /// use orbit_ingest::core::strategy::{StrategySelector, TransferStrategy};
    ///
    /// let selector = StrategySelector::new(1024);
    /// assert_eq!(selector.select(512, ProcessingMode::Auto), TransferStrategy::Buffered);
    /// assert_eq!(selector.select(1024, ProcessingMode::Auto), TransferStrategy::Streamed);
    /// ```
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    /// A forced mode wins; `Auto` compares against the threshold
    pub fn select(&self, size: u64, mode: ProcessingMode) -> TransferStrategy {
        match mode {
            ProcessingMode::Buffered => TransferStrategy::Buffered,
            ProcessingMode::Streamed => TransferStrategy::Streamed,
            ProcessingMode::Auto if size < self.threshold => TransferStrategy::Buffered,
            ProcessingMode::Auto => TransferStrategy::Streamed,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_THRESHOLD)
    }
}
