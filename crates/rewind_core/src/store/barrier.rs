//! Barrier contracts used to copy a live database consistently.

use crate::dir::DatabasePaths;
use crate::error::CoreResult;
use rewind_storage::FileSystem;
use std::sync::Arc;

/// A store whose checkpoints can be suspended.
pub trait Checkpointer {
    /// Runs `f` while no checkpoint is in progress or can start.
    fn checkpoint_barrier(&self, f: &mut dyn FnMut() -> CoreResult<()>) -> CoreResult<()>;
}

/// A store that buffers page writes in a page log and compacts them into
/// range files.
pub trait PageLogger {
    /// Runs `f` while no compaction is in progress or can start.
    fn compaction_barrier(&self, f: &mut dyn FnMut() -> CoreResult<()>) -> CoreResult<()>;

    /// Moves every logged page into its range file.
    fn compact(&self) -> CoreResult<()>;

    /// Returns the on-disk layout of the store.
    fn database_paths(&self) -> &DatabasePaths;

    /// Returns the file system holding the store.
    fn file_system(&self) -> &Arc<dyn FileSystem>;
}
