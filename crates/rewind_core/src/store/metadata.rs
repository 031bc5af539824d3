//! The `_METADATA` file.
//!
//! ```text
//! | page count (8) | page size (8) | reserved (16) |
//! ```
//!
//! Only the page count is rewritten by backups, so it stays in the first
//! eight bytes.

use crate::error::{CoreError, CoreResult};
use rewind_storage::FileSystem;
use std::path::Path;

/// Size of the encoded metadata.
pub const METADATA_SIZE: usize = 32;

/// Persistent store metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Number of pages in the database.
    pub page_count: u64,
    /// Page size the database was created with.
    pub page_size: u64,
}

impl Metadata {
    /// Creates metadata for an empty database.
    #[must_use]
    pub const fn empty(page_size: u64) -> Self {
        Self {
            page_count: 0,
            page_size,
        }
    }

    /// Serializes the metadata.
    #[must_use]
    pub fn encode(&self) -> [u8; METADATA_SIZE] {
        let mut buf = [0u8; METADATA_SIZE];
        buf[0..8].copy_from_slice(&self.page_count.to_le_bytes());
        buf[8..16].copy_from_slice(&self.page_size.to_le_bytes());
        buf
    }

    /// Parses serialized metadata.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `data` is too short.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < METADATA_SIZE {
            return Err(CoreError::invalid_operation(format!(
                "metadata is {} bytes, expected {METADATA_SIZE}",
                data.len()
            )));
        }
        let field = |start: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[start..start + 8]);
            u64::from_le_bytes(bytes)
        };
        Ok(Self {
            page_count: field(0),
            page_size: field(8),
        })
    }

    /// Loads metadata from `path`, or returns empty metadata if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the stored page size differs from
    /// `page_size`.
    pub fn load(fs: &dyn FileSystem, path: &Path, page_size: u64) -> CoreResult<Self> {
        let metadata = match fs.read_file(path) {
            Ok(bytes) => Self::decode(&bytes)?,
            Err(e) if e.is_not_found() => return Ok(Self::empty(page_size)),
            Err(e) => return Err(e.into()),
        };

        if metadata.page_size != page_size {
            return Err(CoreError::invalid_config(format!(
                "database uses {} byte pages, configured for {page_size}",
                metadata.page_size
            )));
        }
        Ok(metadata)
    }

    /// Writes and syncs the metadata file.
    pub fn store(&self, fs: &dyn FileSystem, path: &Path) -> CoreResult<()> {
        fs.write_file(path, &self.encode())?;
        Ok(())
    }
}

/// Returns a copy of encoded metadata with its page count replaced.
///
/// # Errors
///
/// Returns `InvalidOperation` if `data` is too short to hold a page count.
pub fn patch_page_count(data: &[u8], page_count: u64) -> CoreResult<Vec<u8>> {
    if data.len() < 8 {
        return Err(CoreError::invalid_operation(format!(
            "metadata is {} bytes, cannot patch page count",
            data.len()
        )));
    }
    let mut patched = data.to_vec();
    patched[0..8].copy_from_slice(&page_count.to_le_bytes());
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_storage::InMemoryFileSystem;

    #[test]
    fn missing_file_is_empty_database() {
        let fs = InMemoryFileSystem::new();
        let metadata = Metadata::load(&fs, Path::new("_METADATA"), 4096).unwrap();
        assert_eq!(metadata, Metadata::empty(4096));
    }

    #[test]
    fn store_then_load() {
        let fs = InMemoryFileSystem::new();
        let metadata = Metadata {
            page_count: 12,
            page_size: 1024,
        };
        metadata.store(&fs, Path::new("_METADATA")).unwrap();
        assert_eq!(Metadata::load(&fs, Path::new("_METADATA"), 1024).unwrap(), metadata);
        assert!(matches!(
            Metadata::load(&fs, Path::new("_METADATA"), 4096),
            Err(CoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn patch_rewrites_only_page_count() {
        let original = Metadata {
            page_count: 40,
            page_size: 4096,
        }
        .encode();
        let patched = patch_page_count(&original, 2).unwrap();
        let decoded = Metadata::decode(&patched).unwrap();
        assert_eq!(decoded.page_count, 2);
        assert_eq!(decoded.page_size, 4096);
        assert_eq!(&patched[8..], &original[8..]);
        assert!(patch_page_count(&[0; 4], 1).is_err());
    }
}
