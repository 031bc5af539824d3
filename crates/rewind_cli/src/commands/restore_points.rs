//! Restore points command implementation.

use super::{format_timestamp, Context};
use rewind_core::RestorePoints;
use serde::Serialize;

/// Restore points logged during one UTC day.
#[derive(Debug, Serialize)]
pub struct DayRestorePoints {
    /// Start of the day in Unix nanoseconds.
    pub day: i64,
    /// Restore points of the day.
    #[serde(flatten)]
    pub points: RestorePoints,
}

/// Runs the restore-points command.
pub fn run(ctx: &Context, by_day: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = ctx.open()?;

    if by_day {
        let days: Vec<DayRestorePoints> = store
            .snapshot_logger()
            .get_snapshots_with_restore_points()?
            .into_iter()
            .map(|(day, points)| DayRestorePoints { day, points })
            .collect();

        match format {
            "json" => println!("{}", serde_json::to_string_pretty(&days)?),
            _ => {
                println!("Restore Points by Day");
                println!("=====================");
                for day in &days {
                    println!("Day {}", format_timestamp(day.day));
                    println!("  Total: {}", day.points.total);
                    println!("  First: {}", format_timestamp(day.points.start));
                    println!("  Last:  {}", format_timestamp(day.points.end));
                }
            }
        }
        return Ok(());
    }

    let points = store.restore_points()?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&points)?),
        _ => {
            println!("Restore Points for {}", ctx.key);
            println!("====================");
            for point in &points {
                println!(
                    "  {}  pages: {}",
                    format_timestamp(point.timestamp),
                    point.page_count
                );
            }
            println!("Total: {}", points.len());
        }
    }

    Ok(())
}
