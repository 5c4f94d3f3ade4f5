//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for inspecting Sumi-Harvest jobs.
//! Jobs themselves are run by the site integrations that link the library.

use clap::Parser;
use std::path::PathBuf;
use sumi_harvest::config::{load_config_with_hash, Config};
use sumi_harvest::output::{load_statistics, print_statistics};
use sumi_harvest::policy::CandidatePolicy;
use sumi_harvest::{CheckpointRecord, CheckpointStore};
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a resumable, checkpointed extraction engine
///
/// Reads a job configuration and reports on the job's checkpoint file:
/// overall progress, what is still pending, and what the next run would
/// pick up.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version = "1.0.0")]
#[command(about = "Inspect resumable extraction jobs", long_about = None)]
struct Cli {
    /// Path to TOML job configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Show checkpoint statistics and exit (default behavior)
    #[arg(long, conflicts_with_all = ["pending", "dry_run"])]
    stats: bool,

    /// List incomplete checkpoints and their incomplete subtasks
    #[arg(long, conflicts_with_all = ["stats", "dry_run"])]
    pending: bool,

    /// Validate config and show which checkpoints the next run would process
    #[arg(long, conflicts_with_all = ["stats", "pending"])]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let records = load_records(&config).await?;

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config, records);
    } else if cli.pending {
        handle_pending(&records);
    } else {
        handle_stats(&config, &records);
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Reads the job's checkpoint file without creating it
async fn load_records(config: &Config) -> Result<Vec<CheckpointRecord>, Box<dyn std::error::Error>> {
    let path = config.job.checkpoint_path();
    if !path.exists() {
        tracing::warn!("Checkpoint file {} does not exist yet", path.display());
        return Ok(Vec::new());
    }

    let store: CheckpointStore = CheckpointStore::new(path, &config.store);
    Ok(store.read_all().await?)
}

/// Handles the --stats mode: shows progress from the checkpoint file
fn handle_stats(config: &Config, records: &[CheckpointRecord]) {
    println!("Checkpoint file: {}\n", config.job.checkpoint_path().display());
    print_statistics(&load_statistics(records));
}

/// Handles the --pending mode: lists what remains to be done
fn handle_pending(records: &[CheckpointRecord]) {
    let incomplete: Vec<_> = records.iter().filter(|r| r.state().needs_work()).collect();
    println!("=== Pending Checkpoints ({}) ===\n", incomplete.len());

    for record in incomplete {
        match &record.subtasks {
            None => println!("{} (not yet discovered)", record.id),
            Some(subtasks) => {
                println!(
                    "{} ({} of {} subtasks pending)",
                    record.id,
                    record.pending_subtasks(),
                    subtasks.len()
                );
                for subtask in subtasks.iter().filter(|s| !s.completed) {
                    println!("  - {}", subtask.id);
                }
            }
        }
    }
}

/// Handles the --dry-run mode: shows what the next run would process
fn handle_dry_run(config: &Config, records: Vec<CheckpointRecord>) {
    println!("=== Sumi-Harvest Dry Run ===\n");

    println!("Job Configuration:");
    println!("  Name: {}", config.job.name);
    println!("  Checkpoint file: {}", config.job.checkpoint_path().display());
    println!("  Output directory: {}", config.job.output_dir.display());
    println!("  Timeout: {}ms", config.job.timeout_ms);
    println!("  Force all: {}", config.job.force_all);
    println!(
        "  Forced checkpoint ids: {}",
        config.job.force_checkpoint_id.len()
    );
    println!("  Force rediscovery: {}", config.job.force_rediscovery);
    println!("  Skip initial sync: {}", config.job.skip_initial_sync);

    println!("\nCheckpoint Store:");
    println!("  Lock retries: {}", config.store.lock_retries);
    println!(
        "  Lock backoff: {}ms - {}ms",
        config.store.lock_min_backoff_ms, config.store.lock_max_backoff_ms
    );
    println!("  Stale lock after: {}ms", config.store.lock_stale_ms);
    println!("  On corrupt file: {}", config.store.on_corrupt.as_str());

    let total = records.len();
    let candidates = CandidatePolicy::default().select(
        records,
        config.job.force_all,
        &config.job.force_checkpoint_id,
    );

    println!("\nCandidates ({} of {} checkpoints):", candidates.len(), total);
    for record in &candidates {
        println!("  - {} [{}]", record.id, record.state());
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Next run would process {} checkpoint(s)", candidates.len());
}
