/*!
 * Error types for orbit-ingest
 */

use std::fmt;
use std::io;

use thiserror::Error;

use crate::backend::BackendError;
use crate::core::pattern::PatternError;
use crate::warehouse::WarehouseError;

pub type Result<T> = std::result::Result<T, IngestError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Object store or warehouse unreachable (connection test, connect, listing)
    #[error("Cannot reach {system}: {message}")]
    Connectivity { system: String, message: String },

    /// Table setup or dedup query failed; only this table is abandoned
    #[error("Planning failed for table {table}: {message}")]
    Planning { table: String, message: String },

    /// A single object could not be read or written
    #[error("Transfer failed for {key}: {message}")]
    Transfer { key: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pattern rejected at load time
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Object store error not otherwise classified
    #[error("Object store error: {0}")]
    Backend(#[from] BackendError),

    /// Warehouse error not otherwise classified
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Audit log error
    #[error("Audit log error: {0}")]
    AuditLog(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl IngestError {
    /// Connectivity failure against the object store
    pub fn store_unreachable(message: impl fmt::Display) -> Self {
        IngestError::Connectivity {
            system: "object store".to_string(),
            message: message.to_string(),
        }
    }

    /// Connectivity failure against the warehouse
    pub fn warehouse_unreachable(message: impl fmt::Display) -> Self {
        IngestError::Connectivity {
            system: "warehouse".to_string(),
            message: message.to_string(),
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            IngestError::Connectivity { .. }
            | IngestError::Config(_)
            | IngestError::InvalidPattern { .. } => EXIT_FATAL,
            IngestError::Planning { .. } | IngestError::Transfer { .. } => EXIT_PARTIAL,
            _ => EXIT_FATAL,
        }
    }

    /// Check if this error aborts the whole run
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestError::Connectivity { .. } => true,
            IngestError::Config(_) => true,
            IngestError::InvalidPattern { .. } => true,

            // Scoped to a single table or object
            IngestError::Planning { .. } => false,
            IngestError::Transfer { .. } => false,
            IngestError::AuditLog(_) => false,

            IngestError::Backend(_) => false,
            IngestError::Warehouse(_) => false,
            IngestError::Io(_) => false,
            IngestError::Other(_) => false,
        }
    }

    /// Check if this error is transient. Nothing retries automatically;
    /// this only shapes the operator-facing hint.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Backend(err) => err.is_retriable(),
            IngestError::Warehouse(err) => err.is_busy(),
            IngestError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            IngestError::Connectivity { .. } => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            IngestError::Connectivity { .. } => ErrorCategory::Connectivity,
            IngestError::Planning { .. } => ErrorCategory::Planning,
            IngestError::Transfer { .. } => ErrorCategory::Transfer,
            IngestError::Config(_) | IngestError::InvalidPattern { .. } => {
                ErrorCategory::Configuration
            }
            IngestError::Backend(_) => ErrorCategory::ObjectStore,
            IngestError::Warehouse(_) => ErrorCategory::Warehouse,
            IngestError::Io(_) => ErrorCategory::IoError,
            IngestError::AuditLog(_) => ErrorCategory::Audit,
            IngestError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Collaborator unreachable
    Connectivity,
    /// Per-table setup or dedup failures
    Planning,
    /// Per-object read/write failures
    Transfer,
    /// Configuration and pattern errors
    Configuration,
    /// Object store errors
    ObjectStore,
    /// Warehouse errors
    Warehouse,
    /// I/O operation errors
    IoError,
    /// Audit logging errors
    Audit,
    /// Uncategorized errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Connectivity => write!(f, "connectivity"),
            ErrorCategory::Planning => write!(f, "planning"),
            ErrorCategory::Transfer => write!(f, "transfer"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::ObjectStore => write!(f, "object_store"),
            ErrorCategory::Warehouse => write!(f, "warehouse"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Audit => write!(f, "audit"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<PatternError> for IngestError {
    fn from(err: PatternError) -> Self {
        IngestError::InvalidPattern {
            pattern: err.pattern().to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for IngestError {
    fn from(err: toml::de::Error) -> Self {
        IngestError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::AuditLog(format!("JSON serialization error: {}", err))
    }
}
