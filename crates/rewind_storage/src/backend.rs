//! File and file-system trait definitions.

use crate::error::StorageResult;
use std::fmt;
use std::path::Path;

/// An open file handle.
///
/// Handles are **opaque byte stores**. They provide positional reads and
/// writes, appends and durability control. Rewind owns all format
/// interpretation.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `write_at` past the end zero-fills the gap
/// - `read_at` never returns a short read; it fails with `ReadPastEnd`
/// - `sync` ensures all written data survives process termination
pub trait StorageFile: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read would extend beyond the current size or
    /// an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` at `offset`, growing the file if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Appends data to the end of the file.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns the current size of the file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Shrinks the file to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;
}

/// Metadata about a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// Whether the path is a directory.
    pub is_dir: bool,
}

/// A single directory entry returned by [`FileSystem::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name (last path component).
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// A durable file system rooted at some base location.
///
/// All paths are relative to the root of the instance. Operations on paths
/// that do not exist fail with an error whose
/// [`is_not_found`](crate::StorageError::is_not_found) returns true.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Opens an existing file for reading and writing.
    fn open_file(&self, path: &Path) -> StorageResult<Box<dyn StorageFile>>;

    /// Opens a file for reading and writing, creating it when missing.
    ///
    /// The parent directory must already exist.
    fn open_or_create_file(&self, path: &Path) -> StorageResult<Box<dyn StorageFile>>;

    /// Creates a file, truncating it if it already exists.
    fn create_file(&self, path: &Path) -> StorageResult<Box<dyn StorageFile>>;

    /// Reads a whole file into memory.
    fn read_file(&self, path: &Path) -> StorageResult<Vec<u8>>;

    /// Replaces the contents of a file and syncs it.
    fn write_file(&self, path: &Path, data: &[u8]) -> StorageResult<()>;

    /// Lists a directory, sorted by entry name.
    fn read_dir(&self, path: &Path) -> StorageResult<Vec<DirEntry>>;

    /// Creates a directory and all missing parents.
    fn create_dir_all(&self, path: &Path) -> StorageResult<()>;

    /// Removes a single file.
    fn remove_file(&self, path: &Path) -> StorageResult<()>;

    /// Removes a directory and everything below it.
    fn remove_dir_all(&self, path: &Path) -> StorageResult<()>;

    /// Returns metadata for a path.
    fn stat(&self, path: &Path) -> StorageResult<FileStat>;

    /// Returns whether a path exists.
    fn exists(&self, path: &Path) -> StorageResult<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
