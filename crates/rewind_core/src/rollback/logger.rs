//! Hour-bucketed rollback log registry.

use crate::config::Config;
use crate::dir::{parse_bucket_name, DatabasePaths};
use crate::error::{CoreError, CoreResult};
use crate::rollback::entry::RollbackLogEntry;
use crate::rollback::log::RollbackLog;
use crate::types::hour_bucket;
use parking_lot::RwLock;
use rewind_storage::FileSystem;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Resolves timestamps to the rollback log of their UTC hour.
///
/// Logs are opened on first use and cached until [`close`](Self::close).
#[derive(Debug)]
pub struct RollbackLogger {
    fs: Arc<dyn FileSystem>,
    paths: DatabasePaths,
    sync_on_write: bool,
    logs: RwLock<BTreeMap<i64, Arc<RollbackLog>>>,
}

impl RollbackLogger {
    /// Creates a logger for the database at `paths`.
    pub fn new(fs: Arc<dyn FileSystem>, paths: DatabasePaths, config: &Config) -> Self {
        Self {
            fs,
            paths,
            sync_on_write: config.sync_on_write,
            logs: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the log for the hour containing `timestamp`, creating it if needed.
    pub fn get_log(&self, timestamp: i64) -> CoreResult<Arc<RollbackLog>> {
        let hour = hour_bucket(timestamp);
        if let Some(log) = self.logs.read().get(&hour) {
            return Ok(Arc::clone(log));
        }

        let mut logs = self.logs.write();
        if let Some(log) = logs.get(&hour) {
            return Ok(Arc::clone(log));
        }

        let log = Arc::new(self.open_log(hour)?);
        logs.insert(hour, Arc::clone(&log));
        Ok(log)
    }

    fn open_log(&self, hour: i64) -> CoreResult<RollbackLog> {
        let path = self.paths.rollback_log(hour);
        match RollbackLog::open(Arc::clone(&self.fs), path.clone(), hour, self.sync_on_write) {
            Err(e) if e.is_not_found() => {
                let dir = self.paths.rollback_dir();
                debug!(dir = %dir.display(), "creating rollback log directory");
                self.fs.create_dir_all(&dir)?;
                RollbackLog::open(Arc::clone(&self.fs), path, hour, self.sync_on_write)
            }
            result => result,
        }
    }

    /// Starts a frame for a checkpoint at `timestamp`.
    ///
    /// Returns the frame offset and its running size.
    pub fn start_frame(&self, timestamp: i64) -> CoreResult<(u64, u64)> {
        self.get_log(timestamp)?.append_frame(timestamp)
    }

    /// Logs the prior image of `page_number`, returning the bytes written.
    pub fn log(&self, timestamp: i64, page_number: u64, data: Vec<u8>) -> CoreResult<u64> {
        let entry = RollbackLogEntry::new(page_number, timestamp, data)?;
        self.get_log(timestamp)?.append_log(&entry)
    }

    /// Commits the frame started at `timestamp`.
    pub fn commit(&self, timestamp: i64, offset: u64, size: u64) -> CoreResult<()> {
        self.get_log(timestamp)?.commit(offset, size)
    }

    /// Rolls back the frame started at `timestamp`.
    pub fn rollback(&self, timestamp: i64, offset: u64, size: u64) -> CoreResult<()> {
        self.get_log(timestamp)?.rollback(offset, size)
    }

    /// Returns the hour buckets with a log, ascending.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBucketName` if the log directory holds a file whose
    /// name is not a timestamp.
    pub fn keys(&self) -> CoreResult<Vec<i64>> {
        let dir = self.paths.rollback_dir();
        let mut keys: BTreeSet<i64> = self.logs.read().keys().copied().collect();

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

    /// Returns the existing logs from the hour of `start` through `end`,
    /// oldest first.
    pub fn logs_between(&self, start: i64, end: i64) -> CoreResult<Vec<Arc<RollbackLog>>> {
        let first = hour_bucket(start);
        self.keys()?
            .into_iter()
            .filter(|&hour| hour >= first && hour <= end)
            .map(|hour| self.get_log(hour))
            .collect()
    }

    /// Syncs and releases every cached log.
    pub fn close(&self) -> CoreResult<()> {
        let mut logs = self.logs.write();
        for log in logs.values() {
            log.sync()?;
        }
        logs.clear();
        Ok(())
    }
}
