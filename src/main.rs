/*!
 * Orbit Ingest CLI
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

use clap::{Parser, Subcommand};
use orbit_ingest::{
    cli_style::{self, plan_table, print_error, print_info, section_header, Theme},
    config::IngestConfig,
    core::Orchestrator,
    error::{IngestError, Result, EXIT_PARTIAL, EXIT_SUCCESS},
    logging,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "orbit-ingest")]
#[command(version, about = "Route object store files into warehouse tables", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", default_value = "ingest.toml", global = true)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Write JSON logs to this file instead of stdout
    #[arg(long = "log", value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transfer every new object into its table
    Run {
        /// Concurrent transfers (overrides the config file)
        #[arg(short = 'p', long = "parallel", value_name = "N")]
        parallel: Option<usize>,

        /// Append per-object outcomes to this JSON Lines file
        #[arg(long = "audit-log", value_name = "FILE")]
        audit_log: Option<PathBuf>,
    },

    /// Show what a run would transfer without writing rows
    Plan,

    /// Test connectivity to the object store and the warehouse
    Check,

    /// Write a sample configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short = 'f', long = "force")]
        force: bool,
    },
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            let hint = if e.is_transient() {
                Some("The failure looks transient; re-running the job is safe")
            } else {
                None
            };
            print_error(&format!("[{}] {}", e.category(), e), hint);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        return init_config(&cli.config, force);
    }

    let mut config = IngestConfig::from_file(&cli.config)?;
    if cli.verbose {
        config.logging.verbose = true;
    }
    if cli.log.is_some() {
        config.logging.log_file = cli.log.clone();
    }
    if let Commands::Run {
        parallel,
        ref audit_log,
    } = cli.command
    {
        if let Some(parallel) = parallel {
            config.parallel = parallel;
        }
        if audit_log.is_some() {
            config.audit_log_path = audit_log.clone();
        }
    }

    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| IngestError::Other(format!("Failed to start async runtime: {}", e)))?;

    runtime.block_on(execute(cli.command, config))
}

async fn execute(command: Commands, config: IngestConfig) -> Result<i32> {
    let orchestrator = Orchestrator::from_config(config).await?;

    match command {
        Commands::Run { .. } => {
            let summary = orchestrator.run().await?;
            cli_style::print_run_summary(&summary);
            Ok(summary.exit_code())
        }
        Commands::Plan => {
            let plan = orchestrator.plan().await?;
            section_header("Transfer Plan");
            println!("{}", plan_table(&plan));
            print_info(&format!(
                "{} to transfer, {} already loaded, {} over size limit",
                plan.transfer_count(),
                plan.duplicate_count(),
                plan.policy_skip_count()
            ));
            if plan.failures.is_empty() {
                Ok(EXIT_SUCCESS)
            } else {
                for line in cli_style::planning_failure_lines(&plan.failures) {
                    eprintln!("{}", Theme::error(line));
                }
                Ok(EXIT_PARTIAL)
            }
        }
        Commands::Check => {
            orchestrator.check().await?;
            cli_style::print_success(&format!(
                "Object store ({}) and warehouse are reachable",
                orchestrator.config().source.describe()
            ));
            Ok(EXIT_SUCCESS)
        }
        Commands::Init { .. } => Ok(EXIT_SUCCESS),
    }
}

fn init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        return Err(IngestError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    IngestConfig::sample().to_file(path)?;
    cli_style::print_success(&format!("Wrote sample configuration to {}", path.display()));
    Ok(EXIT_SUCCESS)
}
