//! Main entry point for the fencelock binary.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::info;

use fencelock_cli::{ActiveStrategy, LoggingConfig, Settings, commands, init_logging};
use fencelock_core::StrategyKind;

/// Acquire distributed locks from the command line
#[derive(Debug, Parser)]
#[command(name = "fencelock", version, about)]
struct Cli {
    /// Configuration file (defaults to conf/fencelock.yml when present)
    #[arg(short = 'c', long = "config", env = "FENCELOCK_CONFIG")]
    config: Option<PathBuf>,
    /// Lock strategy: quorum or sequential
    #[arg(short = 's', long = "strategy")]
    strategy: Option<StrategyKind>,
    /// Storage node endpoint; repeat for every node
    #[arg(short = 'b', long = "backend")]
    backends: Vec<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Acquire a lock, hold it, then release it
    Acquire {
        resource: String,
        /// How long to hold the lock
        #[arg(long = "hold-ms", default_value_t = 1000)]
        hold_ms: u64,
        #[arg(long = "ttl-ms")]
        ttl_ms: Option<u64>,
        #[arg(long = "wait-ms")]
        wait_ms: Option<u64>,
    },
    /// Run concurrent workers against one lock and report the outcome
    Contend {
        resource: String,
        #[arg(short = 'w', long = "workers", default_value_t = 8)]
        workers: usize,
        #[arg(short = 'r', long = "rounds", default_value_t = 50)]
        rounds: usize,
        /// Time spent inside each critical section
        #[arg(long = "work-ms", default_value_t = 1)]
        work_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(strategy) = cli.strategy {
        settings.strategy = strategy;
    }
    if !cli.backends.is_empty() {
        settings.backends = cli.backends;
    }

    let _logging_guard = init_logging(&LoggingConfig::from_settings(&settings.logging))
        .map_err(|e| anyhow!(e.to_string()))?;
    fencelock_core::metrics::describe_metrics();

    let active = ActiveStrategy::from_settings(&settings).await?;
    info!(strategy = %settings.strategy, "Lock strategy ready");

    let outcome = run(cli.command, &settings, &active).await;
    active.shutdown().await?;
    outcome
}

async fn run(command: Command, settings: &Settings, active: &ActiveStrategy) -> anyhow::Result<()> {
    match command {
        Command::Acquire {
            resource,
            hold_ms,
            ttl_ms,
            wait_ms,
        } => {
            let mut lock = settings.lock.clone();
            if let Some(ttl_ms) = ttl_ms {
                lock.ttl_ms = ttl_ms;
            }
            if wait_ms.is_some() {
                lock.wait_ms = wait_ms;
            }

            let strategy = active.strategy();
            let report = commands::acquire(
                strategy.as_ref(),
                &lock.request(&resource),
                Duration::from_millis(hold_ms),
                |snapshot| match serde_json::to_string(snapshot) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("Failed to encode handle: {}", e),
                },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Contend {
            resource,
            workers,
            rounds,
            work_ms,
        } => {
            let report = commands::contend(
                active.strategy(),
                settings.lock.request(&resource),
                workers,
                rounds,
                Duration::from_millis(work_ms),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
