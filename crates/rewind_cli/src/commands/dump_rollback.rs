//! Dump rollback command implementation.

use super::{format_timestamp, Context};
use rewind_core::types::{hour_bucket, to_hex};
use serde::Serialize;

/// Rollback log entry representation for output.
#[derive(Debug, Serialize)]
pub struct RollbackEntryInfo {
    /// Hour bucket of the log holding the entry.
    pub log: i64,
    /// Timestamp of the frame that logged the entry.
    pub timestamp: i64,
    /// Page the image belongs to.
    pub page_number: u64,
    /// Compressed payload size in bytes.
    pub size_compressed: u32,
    /// Decompressed payload size in bytes.
    pub size_decompressed: u32,
    /// Hex-encoded SHA-256 of the page image.
    pub sha256: String,
}

/// Runs the dump-rollback command.
pub fn run(
    ctx: &Context,
    hour: Option<i64>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = ctx.open()?;
    let logger = store.rollback_logger();
    let logs = match hour {
        Some(hour) => logger.logs_between(hour, hour_bucket(hour))?,
        None => logger.logs_between(0, i64::MAX)?,
    };

    let max_entries = limit.unwrap_or(usize::MAX);
    let mut entries = Vec::new();
    'logs: for log in &logs {
        for batch in log.read_for_timestamp(i64::MIN)? {
            for entry in batch? {
                if entries.len() >= max_entries {
                    break 'logs;
                }
                entries.push(RollbackEntryInfo {
                    log: log.timestamp(),
                    timestamp: entry.timestamp,
                    page_number: entry.page_number,
                    size_compressed: entry.size_compressed,
                    size_decompressed: entry.size_decompressed,
                    sha256: to_hex(&entry.sha256),
                });
            }
        }
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => print_text_output(&entries),
    }

    Ok(())
}

fn print_text_output(entries: &[RollbackEntryInfo]) {
    println!("Rollback Log Entries");
    println!("====================");
    println!();

    let mut current_log = None;
    for entry in entries {
        if current_log != Some(entry.log) {
            println!("Log {}", format_timestamp(entry.log));
            current_log = Some(entry.log);
        }
        println!(
            "  page {:>8}  ts {}  {} -> {} bytes  {}",
            entry.page_number,
            entry.timestamp,
            entry.size_decompressed,
            entry.size_compressed,
            &entry.sha256[..16]
        );
    }

    println!();
    println!("Total entries: {}", entries.len());
}
