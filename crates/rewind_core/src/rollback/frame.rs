//! Rollback log frame header.
//!
//! A frame opens one batch of entries written by a single checkpoint:
//!
//! ```text
//! | identifier "RBLF" (4) | committed (4) | offset (8) | size (8) | timestamp (8) |
//! ```
//!
//! `size` covers the frame header and every entry of the batch. It is
//! written as zero when the frame starts and filled in on commit, together
//! with the committed flag.

use crate::error::{CoreError, CoreResult};
use crate::types::narrow;

/// Identifier at the start of every frame.
pub const FRAME_IDENTIFIER: [u8; 4] = *b"RBLF";

/// Size of the frame header.
pub const FRAME_HEADER_SIZE: usize = 32;

/// Byte offset of the committed flag within the header.
pub const COMMITTED_FIELD_OFFSET: u64 = 4;

/// Byte offset of the size field within the header.
pub const SIZE_FIELD_OFFSET: u64 = 16;

/// Header of one atomic batch of rollback entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackLogFrame {
    /// Whether the batch completed.
    pub committed: bool,
    /// File offset of the frame header.
    pub offset: u64,
    /// Length of the frame header plus its entries.
    pub size: u64,
    /// Checkpoint timestamp in nanoseconds.
    pub timestamp: i64,
}

impl RollbackLogFrame {
    /// Creates an uncommitted frame starting at `offset`.
    #[must_use]
    pub const fn started(offset: u64, timestamp: i64) -> Self {
        Self {
            committed: false,
            offset,
            size: 0,
            timestamp,
        }
    }

    /// Serializes the header.
    ///
    /// # Errors
    ///
    /// Returns `NumericRange` for a negative timestamp.
    pub fn encode(&self) -> CoreResult<[u8; FRAME_HEADER_SIZE]> {
        let timestamp: u64 = narrow(self.timestamp, "timestamp")?;
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..4].copy_from_slice(&FRAME_IDENTIFIER);
        buf[4..8].copy_from_slice(&u32::from(self.committed).to_le_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.size.to_le_bytes());
        buf[24..32].copy_from_slice(&timestamp.to_le_bytes());
        Ok(buf)
    }

    /// Parses a header read at file offset `at`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` for a foreign identifier and
    /// `RollbackLogCorruption` for short input, a committed flag other than
    /// 0 or 1, or a header whose recorded offset disagrees with `at`.
    pub fn decode(data: &[u8], at: u64) -> CoreResult<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(CoreError::rollback_corruption(format!(
                "frame header at offset {at} is {} bytes",
                data.len()
            )));
        }

        let identifier = [data[0], data[1], data[2], data[3]];
        if identifier != FRAME_IDENTIFIER {
            return Err(CoreError::InvalidIdentifier {
                found: identifier,
                offset: at,
            });
        }

        let committed = match u32::from_le_bytes([data[4], data[5], data[6], data[7]]) {
            0 => false,
            1 => true,
            other => {
                return Err(CoreError::rollback_corruption(format!(
                    "frame at offset {at} has committed flag {other}"
                )))
            }
        };

        let field = |start: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[start..start + 8]);
            u64::from_le_bytes(bytes)
        };

        let offset = field(8);
        if offset != at {
            return Err(CoreError::rollback_corruption(format!(
                "frame at offset {at} records offset {offset}"
            )));
        }

        Ok(Self {
            committed,
            offset,
            size: field(16),
            timestamp: narrow(field(24), "timestamp")?,
        })
    }

    /// Returns the offset just past the frame's entries.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.size
    }
}
