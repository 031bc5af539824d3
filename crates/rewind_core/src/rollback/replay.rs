//! Chronological replay of a rollback log.
//!
//! Replay runs on a producer thread that scans the log from the start and
//! sends one batch per matching frame through a bounded channel. The stream
//! always ends with an explicit terminal event, either completion or the
//! error that stopped the scan, so consumers never mistake a failed scan for
//! a short log.
//!
//! ## Scan Policy
//!
//! - Zero bytes between records are rolled-back frames and are skipped
//! - Entries of uncommitted frames are skipped without being decompressed
//! - Committed frames older than the cutoff are skipped using their size
//! - A truncated record at the tail (crash mid-append) ends the scan cleanly;
//!   opening the log for writing cuts such a tail off
//! - Unknown identifiers, truncated committed frames and checksum
//!   mismatches are fatal

use crate::error::{CoreError, CoreResult};
use crate::rollback::entry::{
    RollbackLogEntry, RollbackLogEntryHeader, ENTRY_HEADER_SIZE, ENTRY_IDENTIFIER,
};
use crate::rollback::frame::{RollbackLogFrame, FRAME_HEADER_SIZE, FRAME_IDENTIFIER};
use crate::types::narrow;
use crossbeam::channel::{bounded, Receiver, Sender};
use rewind_storage::StorageFile;
use std::thread;
use tracing::debug;

/// Read buffer size for scanning.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Number of decoded batches buffered ahead of the consumer.
pub const REPLAY_QUEUE_DEPTH: usize = 4;

/// Entries of one committed frame, in append order.
pub type EntryBatch = Vec<RollbackLogEntry>;

enum ReplayEvent {
    Batch(EntryBatch),
    Done,
    Failed(CoreError),
}

/// Stream of entry batches produced by [`RollbackLog::read_for_timestamp`].
///
/// [`RollbackLog::read_for_timestamp`]: crate::rollback::RollbackLog::read_for_timestamp
///
/// Dropping the stream early stops the producer at its next send.
pub struct ReplayStream {
    events: Receiver<ReplayEvent>,
    finished: bool,
}

impl ReplayStream {
    /// Starts a producer scanning the first `limit` bytes of `file`.
    pub(crate) fn spawn(file: Box<dyn StorageFile>, limit: u64, cutoff: i64) -> CoreResult<Self> {
        let (tx, rx) = bounded(REPLAY_QUEUE_DEPTH);
        thread::Builder::new()
            .name("rollback-replay".into())
            .spawn(move || produce(file.as_ref(), limit, cutoff, &tx))?;
        Ok(Self {
            events: rx,
            finished: false,
        })
    }

    /// Blocks until the next batch, the end of the log, or a failure.
    ///
    /// Returns `Ok(None)` once the log is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the producer.
    pub fn next_batch(&mut self) -> CoreResult<Option<EntryBatch>> {
        if self.finished {
            return Ok(None);
        }

        match self.events.recv() {
            Ok(ReplayEvent::Batch(batch)) => Ok(Some(batch)),
            Ok(ReplayEvent::Done) => {
                self.finished = true;
                Ok(None)
            }
            Ok(ReplayEvent::Failed(e)) => {
                self.finished = true;
                Err(e)
            }
            Err(_) => {
                self.finished = true;
                Err(CoreError::rollback_corruption(
                    "replay producer exited without a terminal event",
                ))
            }
        }
    }

    /// Drains the stream into a flat list of entries.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by the producer.
    pub fn collect_entries(mut self) -> CoreResult<Vec<RollbackLogEntry>> {
        let mut entries = Vec::new();
        while let Some(batch) = self.next_batch()? {
            entries.extend(batch);
        }
        Ok(entries)
    }
}

impl Iterator for ReplayStream {
    type Item = CoreResult<EntryBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

impl std::fmt::Debug for ReplayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayStream")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

fn produce(file: &dyn StorageFile, limit: u64, cutoff: i64, tx: &Sender<ReplayEvent>) {
    let result = scan(file, limit, cutoff, |batch| {
        tx.send(ReplayEvent::Batch(batch)).is_ok()
    });
    let terminal = match result {
        Ok(()) => ReplayEvent::Done,
        Err(e) => ReplayEvent::Failed(e),
    };
    // The consumer may already be gone
    let _ = tx.send(terminal);
}

/// Scans a log, handing each included frame's entries to `emit`.
///
/// `emit` returns false to stop the scan early.
pub(crate) fn scan(
    file: &dyn StorageFile,
    limit: u64,
    cutoff: i64,
    mut emit: impl FnMut(EntryBatch) -> bool,
) -> CoreResult<()> {
    let mut cursor = LogCursor::new(file, limit);
    let mut frame: Option<(RollbackLogFrame, bool)> = None;
    let mut batch = EntryBatch::new();

    loop {
        cursor.skip_zeros()?;
        if !cursor.fill(4)? {
            break;
        }

        let at = cursor.position();
        let id = cursor.peek(4);
        let identifier = [id[0], id[1], id[2], id[3]];

        if identifier == FRAME_IDENTIFIER {
            if !batch.is_empty() && !emit(std::mem::take(&mut batch)) {
                return Ok(());
            }
            if !cursor.fill(FRAME_HEADER_SIZE)? {
                break;
            }

            let header = RollbackLogFrame::decode(cursor.peek(FRAME_HEADER_SIZE), at)?;
            let include = header.committed && header.timestamp >= cutoff;

            if header.committed && !include {
                if header.size < FRAME_HEADER_SIZE as u64 || header.end() > limit {
                    return Err(CoreError::rollback_corruption(format!(
                        "committed frame at offset {at} has invalid size {}",
                        header.size
                    )));
                }
                cursor.seek(header.end());
            } else {
                cursor.advance(FRAME_HEADER_SIZE as u64);
            }
            frame = Some((header, include));
        } else if identifier == ENTRY_IDENTIFIER {
            if !cursor.fill(ENTRY_HEADER_SIZE)? {
                break;
            }
            let header = RollbackLogEntryHeader::decode(cursor.peek(ENTRY_HEADER_SIZE), at)?;
            let Some((_, include)) = frame else {
                return Err(CoreError::rollback_corruption(format!(
                    "entry at offset {at} precedes any frame"
                )));
            };

            let len = header.encoded_len();
            if include {
                if !cursor.fill(narrow(len, "entry length")?)? {
                    return Err(CoreError::rollback_corruption(format!(
                        "committed entry at offset {at} is truncated"
                    )));
                }
                let entry = RollbackLogEntry::decode_at(cursor.peek(narrow(len, "entry length")?), at)?;
                batch.push(entry);
            } else if cursor.remaining() < len {
                break;
            }
            cursor.advance(len);
        } else {
            return Err(CoreError::InvalidIdentifier {
                found: identifier,
                offset: at,
            });
        }
    }

    if !batch.is_empty() {
        emit(batch);
    }
    debug!(limit, cutoff, "rollback log scan finished");
    Ok(())
}

/// Finds the offset a log must be cut back to after a crash.
///
/// Returns the end of the last committed frame when anything other than
/// zero bytes follows it: an uncommitted frame, or a torn frame header or
/// entry. Returns `None` when the log needs no repair.
///
/// Only called when a log is opened, so no writer can own the trailing
/// uncommitted frame.
pub(crate) fn recovery_point(file: &dyn StorageFile, limit: u64) -> CoreResult<Option<u64>> {
    let mut cursor = LogCursor::new(file, limit);
    let mut committed_end = 0;
    let mut dirty = false;

    loop {
        cursor.skip_zeros()?;
        if cursor.remaining() == 0 {
            break;
        }
        if !cursor.fill(4)? {
            dirty = true;
            break;
        }

        let at = cursor.position();
        let id = cursor.peek(4);
        let identifier = [id[0], id[1], id[2], id[3]];

        if identifier == FRAME_IDENTIFIER {
            if !cursor.fill(FRAME_HEADER_SIZE)? {
                dirty = true;
                break;
            }
            let header = RollbackLogFrame::decode(cursor.peek(FRAME_HEADER_SIZE), at)?;
            if header.committed {
                if header.size < FRAME_HEADER_SIZE as u64 || header.end() > limit {
                    return Err(CoreError::rollback_corruption(format!(
                        "committed frame at offset {at} has invalid size {}",
                        header.size
                    )));
                }
                cursor.seek(header.end());
                committed_end = header.end();
                dirty = false;
            } else {
                cursor.advance(FRAME_HEADER_SIZE as u64);
                dirty = true;
            }
        } else if identifier == ENTRY_IDENTIFIER {
            // Entries of committed frames are skipped with their frame
            dirty = true;
            if !cursor.fill(ENTRY_HEADER_SIZE)? {
                break;
            }
            let header = RollbackLogEntryHeader::decode(cursor.peek(ENTRY_HEADER_SIZE), at)?;
            let len = header.encoded_len();
            if cursor.remaining() < len {
                break;
            }
            cursor.advance(len);
        } else {
            return Err(CoreError::InvalidIdentifier {
                found: identifier,
                offset: at,
            });
        }
    }

    Ok(dirty.then_some(committed_end))
}

/// Buffered forward reader over the first `limit` bytes of a file.
struct LogCursor<'a> {
    file: &'a dyn StorageFile,
    limit: u64,
    position: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
}

impl<'a> LogCursor<'a> {
    fn new(file: &'a dyn StorageFile, limit: u64) -> Self {
        Self {
            file,
            limit,
            position: 0,
            buffer: Vec::new(),
            buffer_start: 0,
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.position)
    }

    /// Ensures `len` bytes from the current position are buffered.
    ///
    /// Returns false when fewer than `len` bytes remain before the limit.
    fn fill(&mut self, len: usize) -> CoreResult<bool> {
        if self.remaining() < len as u64 {
            return Ok(false);
        }

        let buffered = self.position >= self.buffer_start
            && self.position + len as u64 <= self.buffer_start + self.buffer.len() as u64;
        if buffered {
            return Ok(true);
        }

        // Larger than the default buffer for oversized records
        let want = len.max(READ_BUFFER_SIZE) as u64;
        let want = want.min(self.remaining());
        self.buffer = self.file.read_at(self.position, narrow(want, "read length")?)?;
        self.buffer_start = self.position;
        Ok(true)
    }

    /// Returns `len` buffered bytes at the current position; call `fill` first.
    fn peek(&self, len: usize) -> &[u8] {
        let rel = (self.position - self.buffer_start) as usize;
        &self.buffer[rel..rel + len]
    }

    fn advance(&mut self, n: u64) {
        self.position += n;
    }

    fn seek(&mut self, position: u64) {
        self.position = position;
    }

    fn skip_zeros(&mut self) -> CoreResult<()> {
        while self.fill(1)? {
            let rel = (self.position - self.buffer_start) as usize;
            match self.buffer[rel..].iter().position(|&b| b != 0) {
                Some(n) => {
                    self.position += n as u64;
                    return Ok(());
                }
                None => self.position = self.buffer_start + self.buffer.len() as u64,
            }
        }
        Ok(())
    }
}
