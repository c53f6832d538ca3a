/*!
 * Logging and tracing initialization
 *
 * Stdout gets compact human-readable lines. `--log <file>` switches to JSON
 * lines appended to the file, one run after another, with the run span's
 * close event recording how long each run took.
 */

use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::{Level, Span};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;
use crate::error::{IngestError, Result};

/// The AWS SDK logs every request at debug; keep it at warn unless `RUST_LOG` asks
const QUIET_DEPENDENCIES: &[&str] = &["aws_config=warn", "aws_smithy_runtime=warn", "hyper=warn"];

/// Effective level: `verbose` forces debug
pub fn effective_level(config: &LoggingConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

/// Filter directives used when `RUST_LOG` is unset
pub fn default_directives(level: Level) -> String {
    let mut directives = vec![format!("orbit_ingest={}", level)];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|d| d.to_string()));
    directives.join(",")
}

/// Span wrapping one ingest run; every event inside carries the run id
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("ingest_run", run_id = %run_id)
}

/// Initialize structured logging based on configuration
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(effective_level(config))))
        .map_err(|e| IngestError::Config(format!("Failed to create log filter: {}", e)))?;

    match config.log_file {
        Some(ref log_path) => init_file_logging(log_path, env_filter),
        None => {
            init_stdout_logging(env_filter);
            Ok(())
        }
    }
}

fn init_stdout_logging(env_filter: EnvFilter) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Open `log_path` for appending, creating it and its directory if needed
pub fn open_log_file(log_path: &Path) -> Result<File> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IngestError::Config(format!("Failed to create log directory: {}", e)))?;
        }
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| IngestError::Config(format!("Failed to open log file: {}", e)))
}

fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = open_log_file(log_path)?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json()
        .with_current_span(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}

/// Test-writer logging, safe to call from every test
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(Level::DEBUG)));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = LoggingConfig {
            log_level: LogLevel::Error,
            log_file: None,
            verbose: true,
        };
        assert_eq!(effective_level(&config), Level::DEBUG);
    }

    #[test]
    fn test_configured_level_used() {
        let config = LoggingConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::WARN);
    }

    #[test]
    fn test_default_directives_quiet_the_sdk() {
        let directives = default_directives(Level::DEBUG);
        assert!(directives.starts_with("orbit_ingest=DEBUG"));
        assert!(directives.contains("aws_smithy_runtime=warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_log_file_directory_created_and_appended() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("nightly").join("ingest.jsonl");

        writeln!(open_log_file(&path).unwrap(), "{{\"run\":1}}").unwrap();
        writeln!(open_log_file(&path).unwrap(), "{{\"run\":2}}").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with("{\"run\":1}"));
    }

    #[test]
    fn test_init_test_logging_is_idempotent() {
        init_test_logging();
        init_test_logging();
        let span = run_span("run-test");
        let _entered = span.enter();
        tracing::debug!("still fine");
    }
}
