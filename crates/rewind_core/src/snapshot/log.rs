//! Daily restore point log.

use crate::error::{CoreError, CoreResult};
use crate::types::{day_bucket, narrow, RestorePoint};
use parking_lot::RwLock;
use rewind_storage::{FileSystem, StorageFile};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Size of one restore point record.
///
/// ```text
/// | timestamp (8) | page count (4) |
/// ```
pub const SNAPSHOT_RECORD_SIZE: usize = 12;

/// Summary of the restore points held by one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestorePoints {
    /// Every restore point timestamp, ascending.
    pub data: Vec<i64>,
    /// Earliest timestamp, or 0 when empty.
    pub start: i64,
    /// Latest timestamp, or 0 when empty.
    pub end: i64,
    /// Number of restore points.
    pub total: usize,
}

struct SnapshotState {
    file: Box<dyn StorageFile>,
    /// Page count per restore point timestamp.
    points: BTreeMap<i64, u64>,
}

/// Append-only log of the restore points taken during one UTC day.
pub struct Snapshot {
    path: PathBuf,
    timestamp: i64,
    state: RwLock<SnapshotState>,
}

impl Snapshot {
    /// Opens the snapshot at `path`, creating it if needed, and loads it.
    ///
    /// `timestamp` is the start of the day the snapshot covers.
    pub fn open(fs: &dyn FileSystem, path: PathBuf, timestamp: i64) -> CoreResult<Self> {
        let file = fs.open_or_create_file(&path)?;
        let snapshot = Self {
            path,
            timestamp,
            state: RwLock::new(SnapshotState {
                file,
                points: BTreeMap::new(),
            }),
        };
        snapshot.load()?;
        Ok(snapshot)
    }

    /// Returns the start of the day covered by this snapshot.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the snapshot's path relative to the file system root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rescans the file and rebuilds the in-memory index.
    ///
    /// A torn record at the end of the file is discarded.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotCorruption` if a record belongs to another day.
    pub fn load(&self) -> CoreResult<()> {
        let mut state = self.state.write();
        let size = state.file.size()?;
        let bytes = state.file.read_at(0, narrow(size, "snapshot size")?)?;

        let mut points = BTreeMap::new();
        let records = bytes.chunks_exact(SNAPSHOT_RECORD_SIZE);
        let torn = records.remainder().len();
        for record in records {
            let (timestamp, page_count) = decode_record(record)?;
            if day_bucket(timestamp) != self.timestamp {
                return Err(CoreError::snapshot_corruption(format!(
                    "restore point {timestamp} does not belong to {}",
                    self.path.display()
                )));
            }
            points.insert(timestamp, page_count);
        }

        if torn > 0 {
            warn!(
                path = %self.path.display(),
                bytes = torn,
                "discarding torn restore point record"
            );
            state.file.truncate(size - torn as u64)?;
            state.file.sync()?;
        }

        state.points = points;
        Ok(())
    }

    /// Appends a restore point and syncs it before returning.
    ///
    /// # Errors
    ///
    /// Returns `NumericRange` if the timestamp is negative or the page count
    /// does not fit in 32 bits.
    pub fn log(&self, timestamp: i64, page_count: u64) -> CoreResult<()> {
        let record = encode_record(timestamp, page_count)?;
        let mut state = self.state.write();
        state.file.append(&record)?;
        state.file.sync()?;
        state.points.insert(timestamp, page_count);
        Ok(())
    }

    /// Returns the restore point logged at exactly `timestamp`.
    #[must_use]
    pub fn get_restore_point(&self, timestamp: i64) -> Option<RestorePoint> {
        self.state
            .read()
            .points
            .get(&timestamp)
            .map(|&page_count| RestorePoint::new(timestamp, page_count))
    }

    /// Returns the most recent restore point.
    #[must_use]
    pub fn latest(&self) -> Option<RestorePoint> {
        self.state
            .read()
            .points
            .iter()
            .next_back()
            .map(|(&timestamp, &page_count)| RestorePoint::new(timestamp, page_count))
    }

    /// Returns every restore point, ascending.
    #[must_use]
    pub fn records(&self) -> Vec<RestorePoint> {
        self.state
            .read()
            .points
            .iter()
            .map(|(&timestamp, &page_count)| RestorePoint::new(timestamp, page_count))
            .collect()
    }

    /// Returns the restore point summary.
    #[must_use]
    pub fn restore_points(&self) -> RestorePoints {
        let state = self.state.read();
        let data: Vec<i64> = state.points.keys().copied().collect();
        RestorePoints {
            start: data.first().copied().unwrap_or_default(),
            end: data.last().copied().unwrap_or_default(),
            total: data.len(),
            data,
        }
    }

    /// Syncs the snapshot to durable storage.
    pub fn sync(&self) -> CoreResult<()> {
        self.state.write().file.sync()?;
        Ok(())
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("path", &self.path)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

fn encode_record(timestamp: i64, page_count: u64) -> CoreResult<[u8; SNAPSHOT_RECORD_SIZE]> {
    let timestamp: u64 = narrow(timestamp, "timestamp")?;
    let page_count: u32 = narrow(page_count, "page_count")?;
    let mut record = [0u8; SNAPSHOT_RECORD_SIZE];
    record[0..8].copy_from_slice(&timestamp.to_le_bytes());
    record[8..12].copy_from_slice(&page_count.to_le_bytes());
    Ok(record)
}

fn decode_record(record: &[u8]) -> CoreResult<(i64, u64)> {
    let mut timestamp = [0u8; 8];
    timestamp.copy_from_slice(&record[0..8]);
    let mut page_count = [0u8; 4];
    page_count.copy_from_slice(&record[8..12]);
    Ok((
        narrow(u64::from_le_bytes(timestamp), "timestamp")?,
        u64::from(u32::from_le_bytes(page_count)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NANOS_PER_DAY;
    use rewind_storage::InMemoryFileSystem;

    const DAY: i64 = 20_000 * NANOS_PER_DAY;

    fn open(fs: &InMemoryFileSystem) -> Snapshot {
        Snapshot::open(fs, PathBuf::from("snap"), DAY).unwrap()
    }

    #[test]
    fn log_then_lookup() {
        let fs = InMemoryFileSystem::new();
        let snapshot = open(&fs);
        snapshot.log(DAY + 10, 2).unwrap();
        snapshot.log(DAY + 20, 0).unwrap();

        assert_eq!(
            snapshot.get_restore_point(DAY + 10),
            Some(RestorePoint::new(DAY + 10, 2))
        );
        // A zero page count is still a restore point
        assert_eq!(
            snapshot.get_restore_point(DAY + 20),
            Some(RestorePoint::new(DAY + 20, 0))
        );
        assert_eq!(snapshot.get_restore_point(DAY + 15), None);
        assert_eq!(snapshot.latest(), Some(RestorePoint::new(DAY + 20, 0)));
    }

    #[test]
    fn records_survive_reopen() {
        let fs = InMemoryFileSystem::new();
        open(&fs).log(DAY + 5, 7).unwrap();

        let reopened = open(&fs);
        assert_eq!(reopened.records(), vec![RestorePoint::new(DAY + 5, 7)]);
        assert_eq!(fs.read_file(Path::new("snap")).unwrap().len(), SNAPSHOT_RECORD_SIZE);
    }

    #[test]
    fn summary_tracks_bounds() {
        let fs = InMemoryFileSystem::new();
        let snapshot = open(&fs);
        assert_eq!(snapshot.restore_points(), RestorePoints::default());

        for ts in [DAY + 30, DAY + 10, DAY + 20] {
            snapshot.log(ts, 1).unwrap();
        }
        let summary = snapshot.restore_points();
        assert_eq!(summary.data, vec![DAY + 10, DAY + 20, DAY + 30]);
        assert_eq!((summary.start, summary.end, summary.total), (DAY + 10, DAY + 30, 3));
    }

    #[test]
    fn torn_tail_is_discarded() {
        let fs = InMemoryFileSystem::new();
        open(&fs).log(DAY + 1, 3).unwrap();
        let mut bytes = fs.read_file(Path::new("snap")).unwrap();
        bytes.extend_from_slice(&[1, 2, 3, 4, 5]);
        fs.write_file(Path::new("snap"), &bytes).unwrap();

        let snapshot = open(&fs);
        assert_eq!(snapshot.records().len(), 1);
        snapshot.log(DAY + 2, 4).unwrap();
        assert_eq!(open(&fs).records().len(), 2);
    }

    #[test]
    fn foreign_day_is_corruption() {
        let fs = InMemoryFileSystem::new();
        let record = encode_record(DAY + NANOS_PER_DAY, 1).unwrap();
        fs.write_file(Path::new("snap"), &record).unwrap();

        let err = Snapshot::open(&fs, PathBuf::from("snap"), DAY).unwrap_err();
        assert!(matches!(err, CoreError::SnapshotCorruption { .. }));
    }

    #[test]
    fn page_count_must_fit_record() {
        let fs = InMemoryFileSystem::new();
        let err = open(&fs).log(DAY, u64::from(u32::MAX) + 1).unwrap_err();
        assert!(matches!(err, CoreError::NumericRange { field: "page_count", .. }));
    }
}
