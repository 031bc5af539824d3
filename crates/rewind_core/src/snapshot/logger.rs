//! Day-bucketed snapshot registry.

use crate::dir::{parse_bucket_name, DatabasePaths};
use crate::error::{CoreError, CoreResult};
use crate::snapshot::log::{RestorePoints, Snapshot};
use crate::types::{day_bucket, RestorePoint};
use parking_lot::RwLock;
use rewind_storage::FileSystem;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Resolves timestamps to the snapshot of their UTC day.
#[derive(Debug)]
pub struct SnapshotLogger {
    fs: Arc<dyn FileSystem>,
    paths: DatabasePaths,
    snapshots: RwLock<BTreeMap<i64, Arc<Snapshot>>>,
}

impl SnapshotLogger {
    /// Creates a logger for the database at `paths`.
    pub fn new(fs: Arc<dyn FileSystem>, paths: DatabasePaths) -> Self {
        Self {
            fs,
            paths,
            snapshots: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the snapshot for the day containing `timestamp`, creating it if needed.
    pub fn get_snapshot(&self, timestamp: i64) -> CoreResult<Arc<Snapshot>> {
        let day = day_bucket(timestamp);
        if let Some(snapshot) = self.snapshots.read().get(&day) {
            return Ok(Arc::clone(snapshot));
        }

        let mut snapshots = self.snapshots.write();
        if let Some(snapshot) = snapshots.get(&day) {
            return Ok(Arc::clone(snapshot));
        }

        let path = self.paths.snapshot(day);
        let snapshot = match Snapshot::open(self.fs.as_ref(), path.clone(), day) {
            Err(e) if e.is_not_found() => {
                let dir = self.paths.snapshots_dir();
                debug!(dir = %dir.display(), "creating snapshot directory");
                self.fs.create_dir_all(&dir)?;
                Snapshot::open(self.fs.as_ref(), path, day)?
            }
            result => result?,
        };

        let snapshot = Arc::new(snapshot);
        snapshots.insert(day, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Logs a restore point.
    pub fn log(&self, timestamp: i64, page_count: u64) -> CoreResult<()> {
        self.get_snapshot(timestamp)?.log(timestamp, page_count)
    }

    /// Returns the day buckets with a snapshot, ascending.
    pub fn keys(&self) -> CoreResult<Vec<i64>> {
        let dir = self.paths.snapshots_dir();
        let mut keys: BTreeSet<i64> = self.snapshots.read().keys().copied().collect();

        match self.fs.read_dir(&dir) {
            Ok(entries) => {
                for entry in entries {
                    keys.insert(parse_bucket_name(&dir, &entry.name)?);
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(CoreError::from(e)),
        }

        Ok(keys.into_iter().collect())
    }

    /// Opens every snapshot, oldest first.
    pub fn get_snapshots(&self) -> CoreResult<Vec<Arc<Snapshot>>> {
        self.keys()?
            .into_iter()
            .map(|day| self.get_snapshot(day))
            .collect()
    }

    /// Returns the restore point summary of every non-empty snapshot,
    /// keyed by day.
    pub fn get_snapshots_with_restore_points(&self) -> CoreResult<Vec<(i64, RestorePoints)>> {
        Ok(self
            .get_snapshots()?
            .iter()
            .map(|snapshot| (snapshot.timestamp(), snapshot.restore_points()))
            .filter(|(_, points)| points.total > 0)
            .collect())
    }

    /// Returns the restore point logged at exactly `timestamp`.
    ///
    /// Looking up a day without a snapshot does not create one.
    pub fn get_restore_point(&self, timestamp: i64) -> CoreResult<Option<RestorePoint>> {
        let day = day_bucket(timestamp);
        let cached = self.snapshots.read().contains_key(&day);
        if !cached && !self.fs.exists(&self.paths.snapshot(day))? {
            return Ok(None);
        }
        Ok(self.get_snapshot(day)?.get_restore_point(timestamp))
    }

    /// Returns the most recent restore point across all days.
    pub fn latest_restore_point(&self) -> CoreResult<Option<RestorePoint>> {
        for day in self.keys()?.into_iter().rev() {
            if let Some(point) = self.get_snapshot(day)?.latest() {
                return Ok(Some(point));
            }
        }
        Ok(None)
    }

    /// Returns every restore point across all days, ascending.
    pub fn restore_points(&self) -> CoreResult<Vec<RestorePoint>> {
        let mut points = Vec::new();
        for snapshot in self.get_snapshots()? {
            points.extend(snapshot.records());
        }
        Ok(points)
    }

    /// Syncs and releases every cached snapshot.
    pub fn close(&self) -> CoreResult<()> {
        let mut snapshots = self.snapshots.write();
        for snapshot in snapshots.values() {
            snapshot.sync()?;
        }
        snapshots.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DatabaseKey, NANOS_PER_DAY};
    use rewind_storage::InMemoryFileSystem;

    fn logger() -> (Arc<dyn FileSystem>, SnapshotLogger) {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
        let paths = DatabasePaths::new(&DatabaseKey::new("db", "main"));
        (Arc::clone(&fs), SnapshotLogger::new(fs, paths))
    }

    #[test]
    fn restore_points_span_days() {
        let (_fs, logger) = logger();
        logger.log(NANOS_PER_DAY + 1, 1).unwrap();
        logger.log(3 * NANOS_PER_DAY + 2, 5).unwrap();
        logger.log(3 * NANOS_PER_DAY + 9, 6).unwrap();

        assert_eq!(logger.keys().unwrap(), vec![NANOS_PER_DAY, 3 * NANOS_PER_DAY]);
        assert_eq!(
            logger.latest_restore_point().unwrap(),
            Some(RestorePoint::new(3 * NANOS_PER_DAY + 9, 6))
        );
        assert_eq!(logger.restore_points().unwrap().len(), 3);

        let days = logger.get_snapshots_with_restore_points().unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[1].1.total, 2);
    }

    #[test]
    fn lookup_of_unknown_day_creates_nothing() {
        let (fs, logger) = logger();
        assert_eq!(logger.get_restore_point(NANOS_PER_DAY).unwrap(), None);
        assert_eq!(logger.latest_restore_point().unwrap(), None);

        let dir = DatabasePaths::new(&DatabaseKey::new("db", "main")).snapshots_dir();
        assert!(!fs.exists(&dir).unwrap());
    }

    #[test]
    fn close_releases_cache_but_keeps_data() {
        let (fs, logger) = logger();
        logger.log(NANOS_PER_DAY + 4, 2).unwrap();
        logger.close().unwrap();

        let reopened = SnapshotLogger::new(fs, DatabasePaths::new(&DatabaseKey::new("db", "main")));
        assert_eq!(
            reopened.get_restore_point(NANOS_PER_DAY + 4).unwrap(),
            Some(RestorePoint::new(NANOS_PER_DAY + 4, 2))
        );
    }
}
