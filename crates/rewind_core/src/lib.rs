//! # Rewind Core
//!
//! Point-in-time backup and restore for a paged database.
//!
//! This crate provides:
//! - Rollback logs holding the prior image of every page a checkpoint overwrites
//! - Snapshots recording the restore points a database can be returned to
//! - A page store that checkpoints, compacts and exposes copy barriers
//! - Backups rewound to a restore point and packaged as tar+gzip parts
//! - Restores from a backup or straight from a live database's rollback logs
//!
//! ## Example
//!
//! ```rust
//! use rewind_core::{Backup, BackupLocks, Config, DatabaseKey, PageStore};
//! use rewind_storage::{FileSystem, InMemoryFileSystem};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
//! let config = Config::default().page_size(512);
//! let store = PageStore::open(Arc::clone(&fs), DatabaseKey::new("app", "main"), config).unwrap();
//!
//! let point = store.checkpoint(&BTreeMap::from([(1, vec![7; 512])])).unwrap();
//! let locks = BackupLocks::new();
//! Backup::for_store(&store, point.timestamp).run(&locks, &store).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backup;
pub mod config;
pub mod dir;
pub mod error;
pub mod restore;
pub mod rollback;
pub mod snapshot;
pub mod store;
pub mod types;

pub use backup::{Backup, BackupGuard, BackupInfo, BackupLocks};
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use restore::{
    copy_source_database_to_target_database, list_backups, next_backup, restore_from_backup,
    restore_from_timestamp, OnComplete,
};
pub use rollback::{RollbackLog, RollbackLogEntry, RollbackLogFrame, RollbackLogger};
pub use snapshot::{RestorePoints, Snapshot, SnapshotLogger};
pub use store::{Checkpointer, PageLogger, PageStore};
pub use types::{DatabaseKey, RestorePoint};

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
