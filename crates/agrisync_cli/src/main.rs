//! AgriSync CLI
//!
//! Maintenance tools for the on-device sync journals.
//!
//! # Commands
//!
//! - `stats` - Summarize the offline operation queue
//! - `list` - List queued operations
//! - `retry` - Re-arm failed operations
//! - `cancel` - Withdraw an operation
//! - `cleanup` - Drop old completed operations and compact the journal
//! - `state` - Show per-domain watermarks
//! - `verify` - Check a journal for torn or corrupt records

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// AgriSync command-line maintenance tools.
#[derive(Parser)]
#[command(name = "agrisync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the operation queue journal
    #[arg(global = true, short, long)]
    queue: Option<PathBuf>,

    /// Path to the sync state journal
    #[arg(global = true, short, long)]
    state: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the operation queue
    Stats {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List queued operations
    List {
        /// Only operations in this state (pending, in_progress, failed, ...)
        #[arg(long)]
        state_filter: Option<String>,

        /// Only operations on this entity type
        #[arg(short, long)]
        entity_type: Option<String>,

        /// Maximum number of operations to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Re-arm failed operations
    Retry {
        /// Operation to re-arm
        operation_id: Option<String>,

        /// Re-arm every operation that ran out of retries
        #[arg(short, long)]
        all: bool,
    },

    /// Withdraw a pending or failed operation
    Cancel {
        /// Operation to cancel
        operation_id: String,
    },

    /// Drop completed operations and compact the journal
    Cleanup {
        /// Keep completed operations younger than this many days
        #[arg(short, long, default_value = "7")]
        retention_days: u64,

        /// Reference time in epoch milliseconds (default: now)
        #[arg(long)]
        now: Option<i64>,
    },

    /// Show per-domain watermarks
    State {
        /// Device id used when the journal is empty
        #[arg(short, long, default_value = "unknown")]
        device_id: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check a journal for torn or corrupt records without modifying it
    Verify {
        /// Journal file to check
        path: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Stats { format } => {
            let path = cli.queue.ok_or("Queue path required for stats")?;
            commands::queue::stats(&path, &format)?;
        }
        Commands::List {
            state_filter,
            entity_type,
            limit,
            format,
        } => {
            let path = cli.queue.ok_or("Queue path required for list")?;
            commands::queue::list(&path, state_filter.as_deref(), entity_type, limit, &format)?;
        }
        Commands::Retry { operation_id, all } => {
            let path = cli.queue.ok_or("Queue path required for retry")?;
            match (operation_id, all) {
                (Some(id), false) => commands::queue::retry(&path, &id)?,
                (None, true) => commands::queue::retry_all(&path)?,
                _ => return Err("Pass either an operation id or --all".into()),
            }
        }
        Commands::Cancel { operation_id } => {
            let path = cli.queue.ok_or("Queue path required for cancel")?;
            commands::queue::cancel(&path, &operation_id)?;
        }
        Commands::Cleanup {
            retention_days,
            now,
        } => {
            let path = cli.queue.ok_or("Queue path required for cleanup")?;
            let now = now.unwrap_or_else(commands::now_millis);
            commands::queue::cleanup(&path, retention_days, now)?;
        }
        Commands::State { device_id, format } => {
            let path = cli.state.ok_or("State path required for state")?;
            commands::state::show(&path, &device_id, &format)?;
        }
        Commands::Verify { path } => {
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("AgriSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("AgriSync Engine v{}", agrisync_engine::VERSION);
            println!("Sync protocol v{}", agrisync_protocol::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
