//! Point-in-time backups.
//!
//! A backup reconstructs the database as it was at one restore point and
//! packages it into one or more `backup-<n>.tar.gz` parts under
//! `backups/<restore point>/`:
//!
//! 1. the live range files are read one at a time
//! 2. every page changed since the restore point is put back to its
//!    earliest logged prior image
//! 3. each range file is cut to the pages the restore point claims
//! 4. the metadata file is copied with the restore point's page count
//!
//! Only one backup of a database runs at a time; see [`BackupLocks`].

mod archive;
mod lock;

pub use archive::{read_part, PartWriter, StorageReader, StorageWriter};
pub use lock::{BackupGuard, BackupLocks};

use crate::config::Config;
use crate::dir::{parse_backup_part_name, sequence_name, DatabasePaths, METADATA_FILE};
use crate::error::{CoreError, CoreResult};
use crate::store::{first_page, pages_in_range, patch_page_count, range_index, PageLogger, PageStore};
use crate::types::{narrow, now_nanos, DatabaseKey, RestorePoint};
use rewind_storage::FileSystem;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Serializable description of a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    /// Database the backup belongs to.
    pub database_id: String,
    /// Branch the backup belongs to.
    pub branch_id: String,
    /// Combined size of all parts in bytes.
    pub size: u64,
    /// Restore point timestamp in nanoseconds.
    pub restore_point: i64,
    /// Number of parts.
    pub parts: usize,
}

/// A backup of one database at one restore point.
#[derive(Clone)]
pub struct Backup {
    fs: Arc<dyn FileSystem>,
    key: DatabaseKey,
    paths: DatabasePaths,
    timestamp: i64,
    max_part_size: u64,
}

impl Backup {
    /// Describes the backup of `key` at restore point `timestamp`.
    pub fn new(fs: Arc<dyn FileSystem>, key: DatabaseKey, timestamp: i64, config: &Config) -> Self {
        let paths = DatabasePaths::new(&key);
        Self {
            fs,
            key,
            paths,
            timestamp,
            max_part_size: config.max_part_size,
        }
    }

    /// Describes the backup of `store` at restore point `timestamp`.
    #[must_use]
    pub fn for_store(store: &PageStore, timestamp: i64) -> Self {
        Self::new(
            Arc::clone(store.file_system()),
            store.key().clone(),
            timestamp,
            store.config(),
        )
    }

    /// Returns the restore point timestamp.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the database identity.
    #[must_use]
    pub fn key(&self) -> &DatabaseKey {
        &self.key
    }

    /// Returns the directory holding the backup's parts.
    #[must_use]
    pub fn directory(&self) -> PathBuf {
        self.paths.backup_dir(self.timestamp)
    }

    /// Takes the backup.
    ///
    /// # Errors
    ///
    /// Returns `BackupAlreadyRunning` if another backup of the database
    /// holds its lock in `locks`, and `BackupNoRestorePoint` if the store
    /// has no restore point at this backup's timestamp.
    pub fn run(&self, locks: &BackupLocks, store: &PageStore) -> CoreResult<RestorePoint> {
        let _guard = locks.try_acquire(&self.key.hash())?;
        info!(database = %self.key, timestamp = self.timestamp, "backup started");

        store.compact()?;
        let restore_point = store
            .get_restore_point(self.timestamp)?
            .ok_or(CoreError::BackupNoRestorePoint)?;

        let parts = self.package(store, restore_point)?;
        info!(
            database = %self.key,
            timestamp = self.timestamp,
            page_count = restore_point.page_count,
            parts = parts.len(),
            "backup finished"
        );
        Ok(restore_point)
    }

    fn package(&self, store: &PageStore, restore_point: RestorePoint) -> CoreResult<Vec<PathBuf>> {
        let mut writer =
            PartWriter::create(Arc::clone(&self.fs), self.directory(), self.max_part_size)?;

        let last = range_index(restore_point.page_count, store.config().range_size);
        for index in 1..=last {
            let data = self.read_backup_range_file(store, restore_point, index)?;
            writer.add_file(&sequence_name(index), &data)?;
        }

        let metadata = self.fs.read_file(&self.paths.metadata_file())?;
        writer.add_file(
            METADATA_FILE,
            &patch_page_count(&metadata, restore_point.page_count)?,
        )?;
        writer.finish()
    }

    /// Returns range file `index` as it was at `restore_point`.
    ///
    /// Pages changed after the restore point are replaced by their earliest
    /// logged prior image, and pages past the restore point's page count
    /// are cut off.
    ///
    /// # Errors
    ///
    /// Returns `BackupRangeFileEmpty` if the live range file is missing or
    /// empty.
    pub fn read_backup_range_file(
        &self,
        store: &PageStore,
        restore_point: RestorePoint,
        index: u64,
    ) -> CoreResult<Vec<u8>> {
        let config = store.config();
        let path = self.paths.range_file(index);

        // The file must be read before the logs are scanned so that every
        // change it holds has its prior image in a scanned log
        let mut data = Vec::new();
        store.compaction_barrier(&mut || {
            data = match self.fs.read_file(&path) {
                Ok(data) => data,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            Ok(())
        })?;
        if data.is_empty() {
            return Err(CoreError::BackupRangeFileEmpty { index });
        }

        let first = first_page(index, config.range_size);
        let claimed = pages_in_range(index, restore_point.page_count, config.range_size);
        let keep: usize = narrow(claimed * config.page_size, "range file size")?;
        if data.len() < keep {
            data.resize(keep, 0);
        }

        let page_size: usize = narrow(config.page_size, "page_size")?;
        let mut touched = HashSet::new();
        let logs = store
            .rollback_logger()
            .logs_between(restore_point.timestamp, now_nanos()?)?;
        for log in logs {
            for batch in log.read_for_timestamp(restore_point.timestamp + 1)? {
                for entry in batch? {
                    let page = entry.page_number;
                    if page < first || page >= first + claimed || !touched.insert(page) {
                        continue;
                    }
                    if entry.data.len() != page_size {
                        return Err(CoreError::rollback_corruption(format!(
                            "image of page {page} is {} bytes, expected {page_size}",
                            entry.data.len()
                        )));
                    }
                    let offset: usize = narrow((page - first) * config.page_size, "page offset")?;
                    data[offset..offset + page_size].copy_from_slice(&entry.data);
                }
            }
        }

        data.truncate(keep);
        debug!(index, rewound = touched.len(), bytes = data.len(), "read backup range file");
        Ok(data)
    }

    /// Returns the backup's part files, ordered by part number.
    ///
    /// # Errors
    ///
    /// Returns `RestoreBackupNotFound` if the backup directory is missing.
    pub fn parts(&self) -> CoreResult<Vec<PathBuf>> {
        let dir = self.directory();
        let entries = match self.fs.read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => {
                return Err(CoreError::RestoreBackupNotFound {
                    timestamp: self.timestamp,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mut parts: Vec<(u32, PathBuf)> = entries
            .iter()
            .filter(|entry| !entry.is_dir)
            .filter_map(|entry| {
                parse_backup_part_name(&entry.name).map(|n| (n, dir.join(&entry.name)))
            })
            .collect();
        parts.sort_by_key(|(n, _)| *n);
        Ok(parts.into_iter().map(|(_, path)| path).collect())
    }

    /// Returns true if the backup directory exists.
    pub fn exists(&self) -> CoreResult<bool> {
        Ok(self.fs.exists(&self.directory())?)
    }

    /// Returns the combined size of all parts.
    pub fn size(&self) -> CoreResult<u64> {
        let mut size = 0;
        for part in self.parts()? {
            size += self.fs.stat(&part)?.size;
        }
        Ok(size)
    }

    /// Deletes the backup.
    ///
    /// # Errors
    ///
    /// Returns `RestoreBackupNotFound` if the backup does not exist.
    pub fn delete(&self) -> CoreResult<()> {
        match self.fs.remove_dir_all(&self.directory()) {
            Ok(()) => {
                info!(database = %self.key, timestamp = self.timestamp, "deleted backup");
                Ok(())
            }
            Err(e) if e.is_not_found() => Err(CoreError::RestoreBackupNotFound {
                timestamp: self.timestamp,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns a serializable description of the backup.
    pub fn to_info(&self) -> CoreResult<BackupInfo> {
        let parts = self.parts()?;
        Ok(BackupInfo {
            database_id: self.key.database_id().to_string(),
            branch_id: self.key.branch_id().to_string(),
            size: self.size()?,
            restore_point: self.timestamp,
            parts: parts.len(),
        })
    }
}

impl fmt::Debug for Backup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backup")
            .field("key", &self.key)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}
