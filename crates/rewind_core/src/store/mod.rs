//! Paged database store.
//!
//! `PageStore` keeps fixed-size pages in range files. Checkpoints first go
//! to a page log and are moved into range files by compaction. Every
//! checkpoint is recorded for point-in-time recovery:
//!
//! 1. a rollback frame holding the previous image of each overwritten page
//! 2. the new images, appended to the page log
//! 3. a restore point with the resulting page count
//!
//! ## Locking
//!
//! Lock order is compaction, then checkpoint, then state. Checkpoints and
//! compactions each hold their process lock for their whole duration, so a
//! barrier holding that lock sees no half-finished work.

mod barrier;
mod metadata;
mod page_log;
mod range;

pub use barrier::{Checkpointer, PageLogger};
pub use metadata::{patch_page_count, Metadata, METADATA_SIZE};
pub use page_log::{PageLog, PAGE_RECORD_HEADER_SIZE};
pub use range::{first_page, pages_in_range, range_index, RangeFiles};

use crate::config::Config;
use crate::dir::DatabasePaths;
use crate::error::{CoreError, CoreResult};
use crate::rollback::RollbackLogger;
use crate::snapshot::SnapshotLogger;
use crate::types::{now_nanos, DatabaseKey, RestorePoint};
use parking_lot::{Mutex, RwLock};
use rewind_storage::FileSystem;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct StoreState {
    metadata: Metadata,
    page_log: PageLog,
    /// Timestamp of the newest checkpoint or restore point.
    last_timestamp: i64,
}

/// A live paged database.
pub struct PageStore {
    fs: Arc<dyn FileSystem>,
    key: DatabaseKey,
    paths: DatabasePaths,
    config: Config,
    ranges: RangeFiles,
    rollback: RollbackLogger,
    snapshots: SnapshotLogger,
    checkpoint_lock: Mutex<()>,
    compaction_lock: Mutex<()>,
    state: RwLock<StoreState>,
}

impl PageStore {
    /// Opens the store for `key`, creating nothing until the first write.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is invalid or disagrees
    /// with the page size on disk.
    pub fn open(fs: Arc<dyn FileSystem>, key: DatabaseKey, config: Config) -> CoreResult<Self> {
        config.validate()?;
        let paths = DatabasePaths::new(&key);

        let metadata = Metadata::load(fs.as_ref(), &paths.metadata_file(), config.page_size)?;
        let page_log = PageLog::open(Arc::clone(&fs), paths.clone())?;
        let ranges = RangeFiles::new(Arc::clone(&fs), paths.clone(), &config);
        let rollback = RollbackLogger::new(Arc::clone(&fs), paths.clone(), &config);
        let snapshots = SnapshotLogger::new(Arc::clone(&fs), paths.clone());
        let last_timestamp = snapshots
            .latest_restore_point()?
            .map_or(0, |point| point.timestamp);

        debug!(
            database = %key,
            page_count = metadata.page_count,
            "opened page store"
        );

        Ok(Self {
            fs,
            key,
            paths,
            config,
            ranges,
            rollback,
            snapshots,
            checkpoint_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            state: RwLock::new(StoreState {
                metadata,
                page_log,
                last_timestamp,
            }),
        })
    }

    /// Returns the database identity.
    #[must_use]
    pub fn key(&self) -> &DatabaseKey {
        &self.key
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the range file accessor.
    #[must_use]
    pub fn range_files(&self) -> &RangeFiles {
        &self.ranges
    }

    /// Returns the rollback logger.
    #[must_use]
    pub fn rollback_logger(&self) -> &RollbackLogger {
        &self.rollback
    }

    /// Returns the snapshot logger.
    #[must_use]
    pub fn snapshot_logger(&self) -> &SnapshotLogger {
        &self.snapshots
    }

    /// Returns the number of pages in the database.
    #[must_use]
    pub fn page_count(&self) -> u64 {
        self.state.read().metadata.page_count
    }

    /// Returns the restore point logged at exactly `timestamp`.
    pub fn get_restore_point(&self, timestamp: i64) -> CoreResult<Option<RestorePoint>> {
        self.snapshots.get_restore_point(timestamp)
    }

    /// Returns the most recent restore point.
    pub fn latest_restore_point(&self) -> CoreResult<Option<RestorePoint>> {
        self.snapshots.latest_restore_point()
    }

    /// Returns every restore point, ascending.
    pub fn restore_points(&self) -> CoreResult<Vec<RestorePoint>> {
        self.snapshots.restore_points()
    }

    /// Reads a page, or returns `None` past the end of the database.
    ///
    /// Pages inside the database that were never written read as zeroes.
    pub fn read_page(&self, page: u64) -> CoreResult<Option<Vec<u8>>> {
        let state = self.state.read();
        if page == 0 || page > state.metadata.page_count {
            return Ok(None);
        }
        self.current_image(&state, page).map(Some)
    }

    fn current_image(&self, state: &StoreState, page: u64) -> CoreResult<Vec<u8>> {
        if let Some(image) = state.page_log.read(page)? {
            return Ok(image);
        }
        Ok(self
            .ranges
            .read_page(page)?
            .unwrap_or_else(|| vec![0; self.config.page_size as usize]))
    }

    /// Writes `pages` as one checkpoint and returns its restore point.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for page 0 or images of the wrong size.
    /// If logging fails the checkpoint's rollback frame is rolled back.
    pub fn checkpoint(&self, pages: &BTreeMap<u64, Vec<u8>>) -> CoreResult<RestorePoint> {
        for (&page, image) in pages {
            if page == 0 || image.len() as u64 != self.config.page_size {
                return Err(CoreError::invalid_operation(format!(
                    "page {page} with {} bytes cannot be checkpointed",
                    image.len()
                )));
            }
        }

        let _checkpoint = self.checkpoint_lock.lock();
        let mut state = self.state.write();
        let timestamp = next_timestamp(state.last_timestamp)?;

        let (offset, mut size) = self.rollback.start_frame(timestamp)?;
        let logged = self
            .log_prior_images(&state, timestamp, pages, &mut size)
            .and_then(|()| state.page_log.append(timestamp, pages));
        if let Err(e) = logged {
            if let Err(rollback) = self.rollback.rollback(timestamp, offset, size) {
                warn!(error = %rollback, offset, "failed to roll back checkpoint frame");
            }
            return Err(e);
        }
        self.rollback.commit(timestamp, offset, size)?;

        let highest = pages.keys().next_back().copied().unwrap_or(0);
        state.metadata.page_count = state.metadata.page_count.max(highest);
        state
            .metadata
            .store(self.fs.as_ref(), &self.paths.metadata_file())?;

        let page_count = state.metadata.page_count;
        self.snapshots.log(timestamp, page_count)?;
        state.last_timestamp = timestamp;

        debug!(
            database = %self.key,
            timestamp,
            pages = pages.len(),
            page_count,
            "checkpoint complete"
        );
        Ok(RestorePoint::new(timestamp, page_count))
    }

    fn log_prior_images(
        &self,
        state: &StoreState,
        timestamp: i64,
        pages: &BTreeMap<u64, Vec<u8>>,
        size: &mut u64,
    ) -> CoreResult<()> {
        for &page in pages.keys() {
            if page > state.metadata.page_count {
                continue;
            }
            let prior = self.current_image(state, page)?;
            *size += self.rollback.log(timestamp, page, prior)?;
        }
        Ok(())
    }

    /// Reloads metadata and the page log from disk and drops cached logs.
    pub fn reload(&self) -> CoreResult<()> {
        let mut state = self.state.write();
        self.reload_locked(&mut state)
    }

    fn reload_locked(&self, state: &mut StoreState) -> CoreResult<()> {
        self.rollback.close()?;
        self.snapshots.close()?;
        state.metadata = Metadata::load(
            self.fs.as_ref(),
            &self.paths.metadata_file(),
            self.config.page_size,
        )?;
        state.page_log.reload()?;
        if let Some(point) = self.snapshots.latest_restore_point()? {
            state.last_timestamp = state.last_timestamp.max(point.timestamp);
        }
        Ok(())
    }

    /// Deletes every page, page log, rollback log and snapshot.
    ///
    /// Backups are kept.
    pub fn clear_data(&self) -> CoreResult<()> {
        let _compaction = self.compaction_lock.lock();
        let _checkpoint = self.checkpoint_lock.lock();
        let mut state = self.state.write();

        self.rollback.close()?;
        self.snapshots.close()?;
        for dir in [
            self.paths.ranges_dir(),
            self.paths.page_log_dir(),
            self.paths.rollback_dir(),
            self.paths.snapshots_dir(),
        ] {
            match self.fs.remove_dir_all(&dir) {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
        }

        info!(database = %self.key, "cleared database");
        self.reload_locked(&mut state)
    }

    /// Sets the database to exactly `page_count` pages and logs a restore
    /// point for the result.
    pub fn finalize_restore(&self, page_count: u64) -> CoreResult<RestorePoint> {
        let _compaction = self.compaction_lock.lock();
        let _checkpoint = self.checkpoint_lock.lock();
        let mut state = self.state.write();

        if !state.page_log.is_empty() {
            self.ranges.write_pages(&state.page_log.pages()?)?;
            state.page_log.clear()?;
        }
        self.ranges.resize_to(page_count)?;

        state.metadata.page_count = page_count;
        state
            .metadata
            .store(self.fs.as_ref(), &self.paths.metadata_file())?;

        let timestamp = next_timestamp(state.last_timestamp)?;
        self.snapshots.log(timestamp, page_count)?;
        state.last_timestamp = timestamp;

        info!(database = %self.key, timestamp, page_count, "restore finalized");
        Ok(RestorePoint::new(timestamp, page_count))
    }

    /// Syncs and releases the cached rollback logs and snapshots.
    pub fn close(&self) -> CoreResult<()> {
        // Reopening a log truncates its open frame
        let _checkpoint = self.checkpoint_lock.lock();
        self.rollback.close()?;
        self.snapshots.close()
    }
}

impl Checkpointer for PageStore {
    fn checkpoint_barrier(&self, f: &mut dyn FnMut() -> CoreResult<()>) -> CoreResult<()> {
        let _checkpoint = self.checkpoint_lock.lock();
        f()
    }
}

impl PageLogger for PageStore {
    fn compaction_barrier(&self, f: &mut dyn FnMut() -> CoreResult<()>) -> CoreResult<()> {
        let _compaction = self.compaction_lock.lock();
        f()
    }

    fn compact(&self) -> CoreResult<()> {
        let _compaction = self.compaction_lock.lock();
        let mut state = self.state.write();
        if state.page_log.is_empty() {
            return Ok(());
        }

        let pages = state.page_log.pages()?;
        self.ranges.write_pages(&pages)?;
        state.page_log.clear()?;
        debug!(database = %self.key, pages = pages.len(), "compacted page log");
        Ok(())
    }

    fn database_paths(&self) -> &DatabasePaths {
        &self.paths
    }

    fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("key", &self.key)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Returns a timestamp strictly after `last`.
fn next_timestamp(last: i64) -> CoreResult<i64> {
    Ok(now_nanos()?.max(last + 1))
}
