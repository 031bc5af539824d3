//! Snapshots: per-day files of restore points.
//!
//! Every successful checkpoint logs a restore point, the fact that the
//! database held exactly `page_count` pages at `timestamp`. Restore points
//! are the only instants a backup or restore can target.

mod log;
mod logger;

pub use log::{RestorePoints, Snapshot, SNAPSHOT_RECORD_SIZE};
pub use logger::SnapshotLogger;
