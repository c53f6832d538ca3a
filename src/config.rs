/*!
 * Configuration types for orbit-ingest
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::pattern::CompiledPattern;
use crate::error::{IngestError, Result};
use crate::warehouse::is_valid_table_name;

/// Table used for objects no enabled pattern claims
pub const DEFAULT_TABLE: &str = "S3_FILES";

/// Objects at or above this size stream by default (100 MiB)
pub const DEFAULT_STREAM_THRESHOLD: u64 = 100 * 1024 * 1024;

const MIB: u64 = 1024 * 1024;

/// Main configuration for an ingest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Destination for objects that match no enabled pattern
    #[serde(default = "default_table")]
    pub default_table: String,

    /// Size in bytes at which `auto` patterns switch to streamed transfer
    #[serde(default = "default_stream_threshold")]
    pub stream_threshold: u64,

    /// Concurrent transfers (0 or 1 = sequential)
    #[serde(default)]
    pub parallel: usize,

    /// Append one JSON line per transfer outcome to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log_path: Option<PathBuf>,

    /// Where objects are read from
    pub source: SourceConfig,

    /// Where rows are written to
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Routing rules, evaluated in declaration order
    #[serde(default)]
    pub patterns: Vec<FilePattern>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_table: default_table(),
            stream_threshold: default_stream_threshold(),
            parallel: 0,
            audit_log_path: None,
            source: SourceConfig::Local(LocalSourceConfig {
                root: PathBuf::from("."),
                prefix: String::new(),
            }),
            warehouse: WarehouseConfig::Sqlite(SqliteWarehouseConfig {
                path: PathBuf::from("warehouse.db"),
                busy_timeout_ms: default_busy_timeout_ms(),
            }),
            logging: LoggingConfig::default(),
            patterns: Vec::new(),
        }
    }
}

/// Object source selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// S3 or an S3-compatible store
    S3(S3SourceConfig),

    /// A local directory treated as a bucket
    Local(LocalSourceConfig),
}

impl SourceConfig {
    /// Key prefix the catalog is listed under
    pub fn prefix(&self) -> &str {
        match self {
            SourceConfig::S3(s3) => &s3.prefix,
            SourceConfig::Local(local) => &local.prefix,
        }
    }

    /// Short label for logs and summaries
    pub fn describe(&self) -> String {
        match self {
            SourceConfig::S3(s3) => format!("s3://{}/{}", s3.bucket, s3.prefix),
            SourceConfig::Local(local) => {
                format!("{}/{}", local.root.display(), local.prefix)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3SourceConfig {
    pub bucket: String,

    #[serde(default)]
    pub prefix: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Custom endpoint for MinIO, LocalStack and similar stores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Static credentials; the default provider chain is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    #[serde(default)]
    pub force_path_style: bool,

    /// Per-operation timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSourceConfig {
    pub root: PathBuf,

    #[serde(default)]
    pub prefix: String,
}

/// Warehouse selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WarehouseConfig {
    Sqlite(SqliteWarehouseConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteWarehouseConfig {
    pub path: PathBuf,

    /// How long a write waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write JSON logs to this file instead of stdout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Force debug output
    #[serde(default)]
    pub verbose: bool,
}

/// Logging level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// How a pattern's objects are moved into the warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Pick by size against the stream threshold
    #[default]
    Auto,

    /// Always load the whole object into memory
    Buffered,

    /// Always stream in chunks
    Streamed,
}

/// A routing rule: objects whose key matches go to `target_table`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePattern {
    pub pattern: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    pub target_table: String,

    /// Largest object accepted in bytes (0 = unlimited)
    #[serde(default)]
    pub max_file_size: u64,

    #[serde(default)]
    pub processing_mode: ProcessingMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

impl FilePattern {
    /// Enabled pattern with no ceiling and automatic strategy selection
    pub fn new(pattern: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            enabled: true,
            target_table: target_table.into(),
            max_file_size: 0,
            processing_mode: ProcessingMode::Auto,
            description: None,
            file_type: None,
        }
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_processing_mode(mut self, mode: ProcessingMode) -> Self {
        self.processing_mode = mode;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// CSV files directly under `base_path`, 50 MiB ceiling, streamed
    pub fn csv(base_path: &str, target_table: &str) -> Self {
        Self::new(join_glob(base_path, "*.csv"), target_table)
            .with_max_file_size(50 * MIB)
            .with_processing_mode(ProcessingMode::Streamed)
            .with_description("CSV files")
            .with_file_type("csv")
    }

    /// JSON files, 100 MiB ceiling, streamed
    pub fn json(base_path: &str, target_table: &str) -> Self {
        Self::new(join_glob(base_path, "*.json"), target_table)
            .with_max_file_size(100 * MIB)
            .with_processing_mode(ProcessingMode::Streamed)
            .with_description("JSON files")
            .with_file_type("json")
    }

    /// Text files, 10 MiB ceiling, buffered
    pub fn text(base_path: &str, target_table: &str) -> Self {
        Self::new(join_glob(base_path, "*.txt"), target_table)
            .with_max_file_size(10 * MIB)
            .with_processing_mode(ProcessingMode::Buffered)
            .with_description("Text files")
            .with_file_type("txt")
    }

    /// Everything under `base_path`, 200 MiB ceiling, streamed
    pub fn catch_all(base_path: &str, target_table: &str) -> Self {
        Self::new(join_glob(base_path, "*"), target_table)
            .with_max_file_size(200 * MIB)
            .with_processing_mode(ProcessingMode::Streamed)
            .with_description("All remaining files")
            .with_file_type("*")
    }
}

fn join_glob(base_path: &str, glob: &str) -> String {
    format!("{}/{}", base_path.trim_end_matches('/'), glob)
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_stream_threshold() -> u64 {
    DEFAULT_STREAM_THRESHOLD
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl IngestConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: IngestConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| IngestError::Config(format!("TOML serialization error: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Starter configuration written by `init`
    pub fn sample() -> Self {
        Self {
            source: SourceConfig::S3(S3SourceConfig {
                bucket: "my-bucket".to_string(),
                prefix: "landing/".to_string(),
                region: Some("us-east-1".to_string()),
                endpoint: None,
                access_key: None,
                secret_key: None,
                force_path_style: false,
                timeout_seconds: default_timeout_seconds(),
            }),
            audit_log_path: Some(PathBuf::from("ingest_audit.jsonl")),
            patterns: vec![
                FilePattern::csv("landing", "CSV_FILES"),
                FilePattern::json("landing", "JSON_FILES"),
                FilePattern::text("landing", "TEXT_FILES"),
                FilePattern::catch_all("landing", "OTHER_FILES"),
            ],
            ..Default::default()
        }
    }

    /// Reject configurations that cannot produce a sound run
    pub fn validate(&self) -> Result<()> {
        if !is_valid_table_name(&self.default_table) {
            return Err(IngestError::Config(format!(
                "default_table '{}' is not a valid table name",
                self.default_table
            )));
        }

        if self.stream_threshold == 0 {
            return Err(IngestError::Config(
                "stream_threshold must be greater than zero".to_string(),
            ));
        }

        match &self.source {
            SourceConfig::S3(s3) if s3.bucket.trim().is_empty() => {
                return Err(IngestError::Config("source bucket is empty".to_string()));
            }
            SourceConfig::Local(local) if local.root.as_os_str().is_empty() => {
                return Err(IngestError::Config("source root is empty".to_string()));
            }
            _ => {}
        }

        for pattern in &self.patterns {
            if !is_valid_table_name(&pattern.target_table) {
                return Err(IngestError::Config(format!(
                    "target_table '{}' for pattern '{}' is not a valid table name",
                    pattern.target_table, pattern.pattern
                )));
            }
            CompiledPattern::new(&pattern.pattern)?;
        }

        Ok(())
    }
}
