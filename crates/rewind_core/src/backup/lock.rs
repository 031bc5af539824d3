//! Per-database backup exclusion.

use crate::error::{CoreError, CoreResult};
use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct BackupLock {
    mutex: Arc<Mutex<()>>,
    last_locked_at: Instant,
}

/// Held while a backup runs; releases the database's lock on drop.
#[must_use = "the backup lock is released when the guard is dropped"]
pub struct BackupGuard {
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl std::fmt::Debug for BackupGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupGuard").finish_non_exhaustive()
    }
}

/// Registry of backup locks keyed by database content hash.
///
/// Share one registry between every caller that may back up the same
/// databases.
#[derive(Debug, Default)]
pub struct BackupLocks {
    locks: Mutex<HashMap<String, BackupLock>>,
}

impl BackupLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the backup lock for `database` without waiting.
    ///
    /// # Errors
    ///
    /// Returns `BackupAlreadyRunning` if another backup holds it.
    pub fn try_acquire(&self, database: &str) -> CoreResult<BackupGuard> {
        let mut locks = self.locks.lock();
        let lock = locks
            .entry(database.to_string())
            .or_insert_with(|| BackupLock {
                mutex: Arc::new(Mutex::new(())),
                last_locked_at: Instant::now(),
            });

        let guard = lock
            .mutex
            .try_lock_arc()
            .ok_or_else(|| CoreError::BackupAlreadyRunning {
                database: database.to_string(),
            })?;
        lock.last_locked_at = Instant::now();
        Ok(BackupGuard { _guard: guard })
    }

    /// Drops unheld locks last taken more than `max_idle` ago.
    ///
    /// Returns the number of locks removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| lock.mutex.is_locked() || lock.last_locked_at.elapsed() <= max_idle);
        let evicted = before - locks.len();
        if evicted > 0 {
            debug!(evicted, remaining = locks.len(), "evicted idle backup locks");
        }
        evicted
    }

    /// Returns the number of tracked locks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Returns true if no locks are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
