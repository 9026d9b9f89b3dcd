//! Soak - endurance test orchestrator
//!
//! Runs repeated passes of batch jobs against a storage cluster while
//! harassers inject faults, and reports every job or harasser failure.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use soak::events::{EventBus, spawn_jsonl_writer};
use soak::logs::NoopLogCollector;
use soak::{SoakBackends, SoakRunner};
use soak_common::config::EnvParser;
use soak_common::mock::{MockScheduler, MockStorage};
use soak_common::{
    ErrorCode, LogCollector, LogConfig, SchedulerKind, SoakConfig, SoakError, TokioClock,
    init_logging,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "soak")]
#[command(author, version, about = "Soak endurance test orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a soak test
    Run {
        /// Path to the soak configuration (TOML)
        #[arg(short, long, env = "SOAK_CONFIG")]
        config: PathBuf,

        /// Use the in-memory scheduler instead of Slurm
        #[arg(long)]
        mock: bool,

        /// Run a single pass
        #[arg(long)]
        smoke: bool,

        /// Override the total run time (e.g. "2h", "30m")
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a configuration file and exit
    Validate {
        /// Path to the soak configuration (TOML)
        #[arg(short, long, env = "SOAK_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    match cli.command {
        Commands::Run {
            config,
            mock,
            smoke,
            timeout,
            json,
        } => {
            let mut config = load_config(&config)?;
            if smoke {
                config.soak.smoke = true;
            }
            if let Some(timeout) = timeout {
                config.soak.test_timeout = timeout;
            }
            if mock {
                config.backend.scheduler = SchedulerKind::Mock;
            }
            if let Err(e) = check_backends(&config) {
                eprintln!("[{}] {e}", e.code());
                std::process::exit(2);
            }
            let passed = run(config, json).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Validate { config } => {
            let config = load_config(&config)?;
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration OK: {}", config.soak.name);
                return Ok(());
            }
            let entry = ErrorCode::ConfigValidationError.entry();
            eprintln!("{}", entry.format_brief());
            for problem in &problems {
                eprintln!("  - {problem}");
            }
            std::process::exit(2);
        }
    }
}

/// Load the file and apply `SOAK_*` overrides.
fn load_config(path: &Path) -> Result<SoakConfig> {
    let mut config = SoakConfig::load(path).map_err(describe)?;
    let mut env = EnvParser::new();
    config.apply_env_overrides(&mut env).map_err(describe)?;
    Ok(config)
}

fn describe(error: SoakError) -> anyhow::Error {
    anyhow::anyhow!("[{}] {error}", error.code())
}

/// Only the in-memory storage model is available, so a real scheduler would
/// run jobs against pools that do not exist on the cluster.
fn check_backends(config: &SoakConfig) -> Result<(), SoakError> {
    match config.backend.scheduler {
        SchedulerKind::Mock => Ok(()),
        SchedulerKind::Slurm => Err(SoakError::config(
            "backend.scheduler = \"slurm\" needs a storage control adapter and none is \
             available; use --mock or backend.scheduler = \"mock\"",
        )),
    }
}

async fn run(config: SoakConfig, json: bool) -> Result<bool> {
    let logs: Arc<dyn LogCollector> = Arc::new(NoopLogCollector);
    let backends = SoakBackends {
        scheduler: Arc::new(MockScheduler::new()),
        storage: Arc::new(MockStorage::new()),
        logs,
        clock: Arc::new(TokioClock),
    };

    let events = EventBus::default();
    let writer = match &config.soak.events_file {
        Some(path) => Some(
            spawn_jsonl_writer(&events, path)
                .await
                .with_context(|| format!("Failed to open event log {}", path.display()))?,
        ),
        None => None,
    };

    info!(name = %config.soak.name, scheduler = ?config.backend.scheduler, "Starting soak run");
    let runner = SoakRunner::new(config, backends, events.clone());
    let outcome = runner.run().await;

    drop(events);
    if let Some(writer) = writer {
        if let Err(e) = writer.await {
            warn!("Event log writer failed: {e}");
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    } else {
        print!("{}", outcome.report.render());
    }
    if let Err(e) = &outcome.result {
        eprintln!("[{}] {e}", e.code());
    }
    Ok(outcome.result.is_ok())
}
