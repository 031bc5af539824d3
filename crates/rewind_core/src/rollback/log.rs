//! Hourly rollback log file.

use crate::error::{CoreError, CoreResult};
use crate::rollback::entry::RollbackLogEntry;
use crate::rollback::frame::{
    RollbackLogFrame, COMMITTED_FIELD_OFFSET, FRAME_HEADER_SIZE, SIZE_FIELD_OFFSET,
};
use crate::rollback::replay::{recovery_point, ReplayStream};
use crate::types::narrow;
use parking_lot::Mutex;
use rewind_storage::{FileSystem, StorageFile};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Chunk size used when zero-filling a rolled back frame.
const ZERO_FILL_CHUNK: u64 = 64 * 1024;

struct LogState {
    file: Box<dyn StorageFile>,
    /// Scratch space for LZ4 output, reused across entries.
    compression: Vec<u8>,
    /// Scratch space for the encoded entry.
    encoded: Vec<u8>,
    /// Offset of the last frame appended through this handle, while open.
    tail_frame: Option<u64>,
}

/// One append-only rollback log covering a UTC hour.
///
/// Writers append a frame header, then the batch's entries, then either
/// [`commit`](Self::commit) or [`rollback`](Self::rollback) the frame.
/// Apart from those two operations the file is never rewritten.
pub struct RollbackLog {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    timestamp: i64,
    sync_on_write: bool,
    state: Mutex<LogState>,
}

impl RollbackLog {
    /// Opens the log at `path`, creating an empty file if needed.
    ///
    /// `timestamp` is the start of the hour the log covers. A torn or
    /// uncommitted tail left by a crash is truncated back to the end of the
    /// last committed frame, so new frames start on a record boundary.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the parent directory is missing or the
    /// file cannot be opened or truncated.
    pub fn open(
        fs: Arc<dyn FileSystem>,
        path: PathBuf,
        timestamp: i64,
        sync_on_write: bool,
    ) -> CoreResult<Self> {
        let mut file = fs.open_or_create_file(&path)?;
        let size = file.size()?;
        match recovery_point(file.as_ref(), size) {
            Ok(Some(end)) => {
                warn!(
                    path = %path.display(),
                    size,
                    end,
                    "truncating unfinished rollback log tail"
                );
                file.truncate(end)?;
                file.sync()?;
            }
            Ok(None) => {}
            // Replay reports the damage; the bytes are left for inspection
            Err(e) => warn!(path = %path.display(), error = %e, "rollback log needs repair"),
        }
        Ok(Self {
            fs,
            path,
            timestamp,
            sync_on_write,
            state: Mutex::new(LogState {
                file,
                compression: Vec::new(),
                encoded: Vec::new(),
                tail_frame: None,
            }),
        })
    }

    /// Returns the start of the hour covered by this log.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the log's path relative to the file system root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current file size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.state.lock().file.size()?)
    }

    /// Appends an uncommitted frame header at the end of the log.
    ///
    /// Returns the frame offset and the running frame size, which starts at
    /// the header size and grows by each [`append_log`](Self::append_log).
    pub fn append_frame(&self, timestamp: i64) -> CoreResult<(u64, u64)> {
        let mut state = self.state.lock();
        let offset = state.file.size()?;
        let header = RollbackLogFrame::started(offset, timestamp).encode()?;
        let written = state.file.append(&header)?;
        debug_assert_eq!(written, offset);
        state.tail_frame = Some(offset);
        if self.sync_on_write {
            state.file.flush()?;
        }
        Ok((offset, FRAME_HEADER_SIZE as u64))
    }

    /// Appends an entry to the open frame, returning the bytes written.
    pub fn append_log(&self, entry: &RollbackLogEntry) -> CoreResult<u64> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let len = entry.encode_into(&mut state.compression, &mut state.encoded)?;
        state.file.append(&state.encoded)?;
        if self.sync_on_write {
            state.file.flush()?;
        }
        Ok(len as u64)
    }

    /// Marks the frame at `offset` committed with its final `size`, then syncs.
    ///
    /// # Errors
    ///
    /// Returns `RollbackLogCorruption` if no uncommitted frame starts at
    /// `offset` or the frame would extend past the end of the file.
    pub fn commit(&self, offset: u64, size: u64) -> CoreResult<()> {
        let mut state = self.state.lock();
        let file_size = state.file.size()?;

        let header = state.file.read_at(offset, FRAME_HEADER_SIZE)?;
        let frame = RollbackLogFrame::decode(&header, offset)?;
        if frame.committed {
            return Err(CoreError::rollback_corruption(format!(
                "frame at offset {offset} in {} is already committed",
                self.path.display()
            )));
        }
        if size < FRAME_HEADER_SIZE as u64 || offset + size > file_size {
            return Err(CoreError::rollback_corruption(format!(
                "frame at offset {offset} cannot span {size} bytes of {file_size}"
            )));
        }

        state
            .file
            .write_at(offset + COMMITTED_FIELD_OFFSET, &1u32.to_le_bytes())?;
        state
            .file
            .write_at(offset + SIZE_FIELD_OFFSET, &size.to_le_bytes())?;
        state.file.sync()?;
        if state.tail_frame == Some(offset) {
            state.tail_frame = None;
        }
        Ok(())
    }

    /// Zero-fills the frame at `offset` so readers skip it.
    ///
    /// When the frame is the last one appended, everything from `offset` to
    /// the end of the file is zeroed, including bytes of an append that
    /// failed partway and was never counted in `size`. The space is not
    /// reclaimed.
    ///
    /// # Errors
    ///
    /// Returns `RollbackLogCorruption` if the range extends past the end of
    /// the file.
    pub fn rollback(&self, offset: u64, size: u64) -> CoreResult<()> {
        let mut state = self.state.lock();
        let file_size = state.file.size()?;
        if offset + size > file_size {
            return Err(CoreError::rollback_corruption(format!(
                "cannot roll back {size} bytes at offset {offset} of {file_size}"
            )));
        }

        let end = if state.tail_frame == Some(offset) {
            state.tail_frame = None;
            file_size
        } else {
            offset + size
        };
        let zeroes = vec![0u8; narrow((end - offset).min(ZERO_FILL_CHUNK), "zero fill")?];
        let mut at = offset;
        while at < end {
            let len = (end - at).min(ZERO_FILL_CHUNK) as usize;
            state.file.write_at(at, &zeroes[..len])?;
            at += len as u64;
        }
        state.file.sync()?;
        debug!(path = %self.path.display(), offset, size = end - offset, "rolled back frame");
        Ok(())
    }

    /// Replays committed frames with a timestamp at or after `cutoff`.
    ///
    /// The scan covers the log as it is now and runs on its own file handle,
    /// so writers are not blocked while the stream is consumed.
    pub fn read_for_timestamp(&self, cutoff: i64) -> CoreResult<ReplayStream> {
        let limit = {
            let mut state = self.state.lock();
            state.file.flush()?;
            state.file.size()?
        };
        let file = self.fs.open_file(&self.path)?;
        ReplayStream::spawn(file, limit, cutoff)
    }

    /// Syncs the log to durable storage.
    pub fn sync(&self) -> CoreResult<()> {
        self.state.lock().file.sync()?;
        Ok(())
    }
}

impl fmt::Debug for RollbackLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackLog")
            .field("path", &self.path)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}
