//! Rollback log entry format and codec.
//!
//! An entry is a 100-byte header followed by the LZ4 block-compressed page
//! image:
//!
//! ```text
//! | offset | size | field                               |
//! |--------|------|-------------------------------------|
//! | 0      | 4    | identifier "RBLE"                   |
//! | 4      | 4    | version                             |
//! | 8      | 4    | page number                         |
//! | 12     | 8    | timestamp (ns)                      |
//! | 20     | 4    | decompressed size                   |
//! | 24     | 4    | compressed size                     |
//! | 28     | 32   | SHA-256 of the decompressed image   |
//! | 60     | 40   | reserved, zero                      |
//! ```
//!
//! All integers are little-endian.

use crate::error::{CoreError, CoreResult};
use crate::types::narrow;
use sha2::{Digest, Sha256};

/// Identifier at the start of every entry.
pub const ENTRY_IDENTIFIER: [u8; 4] = *b"RBLE";

/// Current entry format version.
pub const ENTRY_VERSION: u32 = 1;

/// Size of the fixed entry header.
pub const ENTRY_HEADER_SIZE: usize = 100;

const HASH_RANGE: std::ops::Range<usize> = 28..60;

/// Typed view of the fixed entry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackLogEntryHeader {
    /// Format version.
    pub version: u32,
    /// Page the image belongs to.
    pub page_number: u32,
    /// Timestamp of the frame that logged the image.
    pub timestamp: u64,
    /// Length of the page image.
    pub size_decompressed: u32,
    /// Length of the compressed payload following the header.
    pub size_compressed: u32,
    /// SHA-256 of the page image.
    pub sha256: [u8; 32],
}

impl RollbackLogEntryHeader {
    /// Serializes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; ENTRY_HEADER_SIZE] {
        let mut buf = [0u8; ENTRY_HEADER_SIZE];
        buf[0..4].copy_from_slice(&ENTRY_IDENTIFIER);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.page_number.to_le_bytes());
        buf[12..20].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[20..24].copy_from_slice(&self.size_decompressed.to_le_bytes());
        buf[24..28].copy_from_slice(&self.size_compressed.to_le_bytes());
        buf[HASH_RANGE].copy_from_slice(&self.sha256);
        buf
    }

    /// Parses a header from the first [`ENTRY_HEADER_SIZE`] bytes of `data`.
    ///
    /// `offset` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` for a foreign identifier and
    /// `RollbackLogCorruption` for short input or an unsupported version.
    pub fn decode(data: &[u8], offset: u64) -> CoreResult<Self> {
        if data.len() < ENTRY_HEADER_SIZE {
            return Err(CoreError::rollback_corruption(format!(
                "entry header at offset {offset} is {} bytes",
                data.len()
            )));
        }

        let identifier = read_array::<4>(data, 0);
        if identifier != ENTRY_IDENTIFIER {
            return Err(CoreError::InvalidIdentifier {
                found: identifier,
                offset,
            });
        }

        let version = u32::from_le_bytes(read_array(data, 4));
        if version > ENTRY_VERSION {
            return Err(CoreError::rollback_corruption(format!(
                "unsupported entry version {version} at offset {offset}"
            )));
        }

        Ok(Self {
            version,
            page_number: u32::from_le_bytes(read_array(data, 8)),
            timestamp: u64::from_le_bytes(read_array(data, 12)),
            size_decompressed: u32::from_le_bytes(read_array(data, 20)),
            size_compressed: u32::from_le_bytes(read_array(data, 24)),
            sha256: read_array(data, HASH_RANGE.start),
        })
    }

    /// Returns the total encoded length of the entry (header plus payload).
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        ENTRY_HEADER_SIZE as u64 + u64::from(self.size_compressed)
    }
}

/// The image of one page before it was overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackLogEntry {
    /// Page the image belongs to.
    pub page_number: u64,
    /// Timestamp of the frame that logged the image, in nanoseconds.
    pub timestamp: i64,
    /// Decompressed page image.
    pub data: Vec<u8>,
    /// Compressed payload length (set once encoded or decoded).
    pub size_compressed: u32,
    /// Decompressed payload length.
    pub size_decompressed: u32,
    /// SHA-256 of `data`.
    pub sha256: [u8; 32],
    /// Format version.
    pub version: u32,
}

impl RollbackLogEntry {
    /// Creates an entry for a page image, computing its hash.
    ///
    /// # Errors
    ///
    /// Returns `NumericRange` if the image is larger than `u32::MAX` bytes.
    pub fn new(page_number: u64, timestamp: i64, data: Vec<u8>) -> CoreResult<Self> {
        let size_decompressed = narrow(data.len(), "size_decompressed")?;
        Ok(Self {
            page_number,
            timestamp,
            sha256: Sha256::digest(&data).into(),
            size_compressed: 0,
            size_decompressed,
            version: ENTRY_VERSION,
            data,
        })
    }

    /// Serializes the entry into a fresh buffer.
    ///
    /// # Errors
    ///
    /// See [`RollbackLogEntry::encode_into`].
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut compression = Vec::new();
        let mut out = Vec::new();
        self.encode_into(&mut compression, &mut out)?;
        Ok(out)
    }

    /// Serializes the entry into `out`, reusing `compression` as scratch space.
    ///
    /// `out` is cleared first. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `NumericRange` if the page number, timestamp or sizes do not
    /// fit their header fields, or `InvalidOperation` if compression fails.
    pub fn encode_into(&self, compression: &mut Vec<u8>, out: &mut Vec<u8>) -> CoreResult<usize> {
        let page_number = narrow(self.page_number, "page_number")?;
        let timestamp = narrow(self.timestamp, "timestamp")?;
        let size_decompressed = narrow(self.data.len(), "size_decompressed")?;

        let compressed_len = if self.data.is_empty() {
            0
        } else {
            let max = lz4_flex::block::get_maximum_output_size(self.data.len());
            if compression.len() < max {
                compression.resize(max, 0);
            }
            lz4_flex::block::compress_into(&self.data, compression)
                .map_err(|e| CoreError::invalid_operation(format!("compression failed: {e}")))?
        };

        let header = RollbackLogEntryHeader {
            version: ENTRY_VERSION,
            page_number,
            timestamp,
            size_decompressed,
            size_compressed: narrow(compressed_len, "size_compressed")?,
            sha256: Sha256::digest(&self.data).into(),
        };

        out.clear();
        out.reserve(ENTRY_HEADER_SIZE + compressed_len);
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&compression[..compressed_len]);
        Ok(out.len())
    }

    /// Decodes an entry from `data`, which must start at the entry header.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier`, `RollbackLogCorruption`, `Decompression`
    /// or `ChecksumMismatch` when the bytes are not an intact entry.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        Self::decode_at(data, 0)
    }

    /// Like [`RollbackLogEntry::decode`], reporting `offset` in errors.
    pub(crate) fn decode_at(data: &[u8], offset: u64) -> CoreResult<Self> {
        let header = RollbackLogEntryHeader::decode(data, offset)?;
        let end = ENTRY_HEADER_SIZE + header.size_compressed as usize;
        if data.len() < end {
            return Err(CoreError::rollback_corruption(format!(
                "entry at offset {offset} truncated: need {end} bytes, have {}",
                data.len()
            )));
        }

        let payload = &data[ENTRY_HEADER_SIZE..end];
        let expected = header.size_decompressed as usize;
        let image = if payload.is_empty() && expected == 0 {
            Vec::new()
        } else {
            lz4_flex::block::decompress(payload, expected)
                .map_err(|e| CoreError::decompression(format!("page {}: {e}", header.page_number)))?
        };

        if image.len() != expected {
            return Err(CoreError::decompression(format!(
                "page {}: expected {expected} bytes, got {}",
                header.page_number,
                image.len()
            )));
        }

        let actual: [u8; 32] = Sha256::digest(&image).into();
        if actual != header.sha256 {
            return Err(CoreError::ChecksumMismatch {
                page_number: u64::from(header.page_number),
            });
        }

        Ok(Self {
            page_number: u64::from(header.page_number),
            timestamp: narrow(header.timestamp, "timestamp")?,
            data: image,
            size_compressed: header.size_compressed,
            size_decompressed: header.size_decompressed,
            sha256: header.sha256,
            version: header.version,
        })
    }
}

/// Copies `N` bytes starting at `at`; callers have checked the length.
fn read_array<const N: usize>(data: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[at..at + N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Incompressible page so every payload byte is a literal.
    fn page(seed: u8) -> Vec<u8> {
        let mut state = 0x9E37_79B9_7F4A_7C15_u64 ^ u64::from(seed);
        (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn header_layout() {
        let entry = RollbackLogEntry::new(7, 1_000, vec![1, 2, 3]).unwrap();
        let bytes = entry.encode().unwrap();

        assert_eq!(&bytes[0..4], b"RBLE");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), ENTRY_VERSION);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 7);
        assert_eq!(u64::from_le_bytes(bytes[12..20].try_into().unwrap()), 1_000);
        assert_eq!(u32::from_le_bytes(bytes[20..24].try_into().unwrap()), 3);
        assert_eq!(&bytes[28..60], &entry.sha256);
        assert!(bytes[60..100].iter().all(|&b| b == 0));

        let compressed = u32::from_le_bytes(bytes[24..28].try_into().unwrap()) as usize;
        assert_eq!(bytes.len(), ENTRY_HEADER_SIZE + compressed);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let entry = RollbackLogEntry::new(1, 5, Vec::new()).unwrap();
        let bytes = entry.encode().unwrap();
        assert_eq!(bytes.len(), ENTRY_HEADER_SIZE);

        let decoded = RollbackLogEntry::decode(&bytes).unwrap();
        assert!(decoded.data.is_empty());
        assert_eq!(decoded.sha256, entry.sha256);
    }

    #[test]
    fn page_number_overflow_is_rejected() {
        let entry = RollbackLogEntry::new(u64::from(u32::MAX) + 1, 1, vec![0; 16]).unwrap();
        assert!(matches!(
            entry.encode(),
            Err(CoreError::NumericRange {
                field: "page_number",
                ..
            })
        ));
    }

    #[test]
    fn negative_timestamp_is_rejected() {
        let entry = RollbackLogEntry::new(1, -1, vec![0; 16]).unwrap();
        assert!(entry.encode().unwrap_err().is_integrity());
    }

    #[test]
    fn wrong_identifier_is_rejected() {
        let mut bytes = RollbackLogEntry::new(1, 1, page(1)).unwrap().encode().unwrap();
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(matches!(
            RollbackLogEntry::decode(&bytes),
            Err(CoreError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn checksum_byte_flips_are_detected() {
        let bytes = RollbackLogEntry::new(3, 9, page(3)).unwrap().encode().unwrap();
        for i in HASH_RANGE {
            let mut corrupted = bytes.clone();
            corrupted[i] ^= 0x01;
            assert!(matches!(
                RollbackLogEntry::decode(&corrupted),
                Err(CoreError::ChecksumMismatch { page_number: 3 })
            ));
        }
    }

    #[test]
    fn payload_byte_flips_are_detected() {
        let bytes = RollbackLogEntry::new(3, 9, page(4)).unwrap().encode().unwrap();
        let payload_len = bytes.len() - ENTRY_HEADER_SIZE;
        for i in [payload_len / 4, payload_len / 2, payload_len - 1] {
            let mut corrupted = bytes.clone();
            corrupted[ENTRY_HEADER_SIZE + i] ^= 0xFF;
            let err = RollbackLogEntry::decode(&corrupted).unwrap_err();
            assert!(err.is_integrity(), "unexpected error {err}");
        }
    }

    #[test]
    fn reused_buffers_produce_identical_bytes() {
        let mut compression = Vec::new();
        let mut out = Vec::new();
        for seed in 0..4 {
            let entry = RollbackLogEntry::new(u64::from(seed) + 1, 10, page(seed)).unwrap();
            entry.encode_into(&mut compression, &mut out).unwrap();
            assert_eq!(out, entry.encode().unwrap());
        }
    }

    proptest! {
        #[test]
        fn roundtrip_preserves_payload(data in proptest::collection::vec(any::<u8>(), 0..8192), page_number in 1u64..1_000_000, timestamp in 0i64..i64::MAX) {
            let entry = RollbackLogEntry::new(page_number, timestamp, data.clone()).unwrap();
            let bytes = entry.encode().unwrap();
            let expected: [u8; 32] = Sha256::digest(&data).into();
            prop_assert_eq!(&bytes[28..60], &expected[..]);

            let decoded = RollbackLogEntry::decode(&bytes).unwrap();
            prop_assert_eq!(decoded.data, data);
            prop_assert_eq!(decoded.page_number, page_number);
            prop_assert_eq!(decoded.timestamp, timestamp);
        }

        #[test]
        fn corruption_never_yields_a_wrong_image(data in proptest::collection::vec(any::<u8>(), 1..2048), flip in any::<prop::sample::Index>(), mask in 1u8..=255) {
            let bytes = RollbackLogEntry::new(1, 1, data.clone()).unwrap().encode().unwrap();
            let region = 28..bytes.len();
            let at = region.start + flip.index(region.len());
            if (60..ENTRY_HEADER_SIZE).contains(&at) {
                return Ok(());
            }
            let mut corrupted = bytes;
            corrupted[at] ^= mask;
            match RollbackLogEntry::decode(&corrupted) {
                Ok(decoded) => prop_assert_eq!(decoded.data, data),
                Err(e) => prop_assert!(e.is_integrity()),
            }
        }
    }
}
