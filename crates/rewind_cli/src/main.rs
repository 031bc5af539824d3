//! Rewind CLI
//!
//! Command-line tools for Rewind backups and point-in-time restores.
//!
//! # Commands
//!
//! - `restore-points` - List the restore points of a database branch
//! - `backup` - Back up a branch at a restore point
//! - `list-backups` - List the backups of a branch
//! - `restore-backup` - Restore a branch from a backup
//! - `restore` - Restore a branch from another branch's rollback logs
//! - `dump-rollback` - Dump rollback log entries for debugging

mod commands;

use clap::{Parser, Subcommand};
use commands::Context;
use rewind_core::config::{DEFAULT_PAGE_SIZE, DEFAULT_RANGE_SIZE};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Rewind command-line backup and restore tools.
#[derive(Parser)]
#[command(name = "rewind")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root directory holding the databases
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Database identifier
    #[arg(global = true, short, long)]
    database: Option<String>,

    /// Branch identifier
    #[arg(global = true, short, long, default_value = "main")]
    branch: String,

    /// Page size of the database in bytes
    #[arg(global = true, long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u64,

    /// Pages per range file
    #[arg(global = true, long, default_value_t = DEFAULT_RANGE_SIZE)]
    range_size: u64,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List restore points
    RestorePoints {
        /// Group restore points by day
        #[arg(long)]
        by_day: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Back up the branch at a restore point
    Backup {
        /// Restore point to back up (defaults to the latest)
        #[arg(short, long)]
        timestamp: Option<i64>,

        /// Payload bytes per backup part
        #[arg(long)]
        max_part_size: Option<u64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List the backups of the branch
    ListBackups {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Restore another branch from one of this branch's backups
    RestoreBackup {
        /// Branch to restore into
        #[arg(long)]
        target_branch: String,

        /// Restore point of the backup
        #[arg(short, long)]
        timestamp: i64,
    },

    /// Restore another branch to one of this branch's restore points
    Restore {
        /// Branch to restore into
        #[arg(long)]
        target_branch: String,

        /// Restore point to restore
        #[arg(short, long)]
        timestamp: i64,
    },

    /// Dump rollback log entries for debugging
    DumpRollback {
        /// Only dump the log of the hour containing this timestamp
        #[arg(long)]
        hour: Option<i64>,

        /// Maximum number of entries to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("Rewind CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("Rewind Core v{}", rewind_core::VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or("Database root path required")?;
    let database = cli.database.ok_or("Database identifier required")?;
    let ctx = Context::new(path, database, cli.branch, cli.page_size, cli.range_size)?;

    match cli.command {
        Commands::RestorePoints { by_day, format } => {
            commands::restore_points::run(&ctx, by_day, &format)?;
        }
        Commands::Backup {
            timestamp,
            max_part_size,
            format,
        } => {
            commands::backup::create(&ctx, timestamp, max_part_size, &format)?;
        }
        Commands::ListBackups { format } => {
            commands::backup::list(&ctx, &format)?;
        }
        Commands::RestoreBackup {
            target_branch,
            timestamp,
        } => {
            commands::restore::from_backup(&ctx, &target_branch, timestamp)?;
        }
        Commands::Restore {
            target_branch,
            timestamp,
        } => {
            commands::restore::from_timestamp(&ctx, &target_branch, timestamp)?;
        }
        Commands::DumpRollback {
            hour,
            limit,
            format,
        } => {
            commands::dump_rollback::run(&ctx, hour, limit, &format)?;
        }
        Commands::Version => {}
    }

    Ok(())
}
