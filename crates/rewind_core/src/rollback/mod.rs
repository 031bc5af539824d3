//! Rollback logs: per-hour files of page images taken before each checkpoint.
//!
//! Every checkpoint writes one frame. The frame header is appended first
//! with its committed flag cleared, followed by one entry per page the
//! checkpoint overwrites, holding the page's previous image:
//!
//! ```text
//! | frame (32) | entry (100 + N) | entry (100 + N) | ... | frame (32) | ...
//! ```
//!
//! When the checkpoint succeeds the frame is committed in place; when it
//! fails the whole frame is zero-filled. Replaying the committed frames
//! written after a restore point, oldest first, and keeping the first image
//! seen for each page yields the pages as they were at that restore point.
//!
//! ## Invariants
//!
//! - Logs are append-only apart from commit and rollback
//! - A commit is synced before it returns
//! - Only committed frames are ever replayed
//! - Every replayed image matches its SHA-256 or replay fails

mod entry;
mod frame;
mod log;
mod logger;
mod replay;

pub use entry::{
    RollbackLogEntry, RollbackLogEntryHeader, ENTRY_HEADER_SIZE, ENTRY_IDENTIFIER, ENTRY_VERSION,
};
pub use frame::{RollbackLogFrame, FRAME_HEADER_SIZE, FRAME_IDENTIFIER};
pub use log::RollbackLog;
pub use logger::RollbackLogger;
pub use replay::{EntryBatch, ReplayStream, REPLAY_QUEUE_DEPTH};
