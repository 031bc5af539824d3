//! CLI command implementations.

pub mod backup;
pub mod dump_rollback;
pub mod restore;
pub mod restore_points;

use rewind_core::{Config, DatabaseKey, PageStore};
use rewind_storage::{FileSystem, LocalFileSystem};
use std::path::PathBuf;
use std::sync::Arc;

/// Database selection shared by every command.
pub struct Context {
    /// File system rooted at the database root directory.
    pub fs: Arc<dyn FileSystem>,
    /// Selected database branch.
    pub key: DatabaseKey,
    /// Store configuration.
    pub config: Config,
}

impl Context {
    /// Builds a context for `database`/`branch` under `root`.
    pub fn new(
        root: PathBuf,
        database: String,
        branch: String,
        page_size: u64,
        range_size: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        if !root.is_dir() {
            return Err(format!("No database root found at {:?}", root).into());
        }
        let config = Config::default().page_size(page_size).range_size(range_size);
        config.validate()?;

        Ok(Self {
            fs: Arc::new(LocalFileSystem::new(root)),
            key: DatabaseKey::new(database, branch),
            config,
        })
    }

    /// Opens the selected branch.
    pub fn open(&self) -> Result<PageStore, Box<dyn std::error::Error>> {
        self.open_branch(self.key.branch_id())
    }

    /// Opens another branch of the selected database.
    pub fn open_branch(&self, branch: &str) -> Result<PageStore, Box<dyn std::error::Error>> {
        let key = DatabaseKey::new(self.key.database_id(), branch);
        Ok(PageStore::open(
            Arc::clone(&self.fs),
            key,
            self.config.clone(),
        )?)
    }
}

/// Formats a Unix nanosecond timestamp as seconds and nanoseconds since epoch.
pub fn format_timestamp(nanos: i64) -> String {
    let secs = nanos.div_euclid(1_000_000_000);
    let frac = nanos.rem_euclid(1_000_000_000);
    format!("{nanos} ({secs}.{frac:09}s since epoch)")
}
