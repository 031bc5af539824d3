//! Local file system backed by OS file APIs.

use crate::backend::{DirEntry, FileStat, FileSystem, StorageFile};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maps an I/O error on `path` into a storage error, keeping the
/// not-found classification explicit.
fn map_io(path: &Path, err: io::Error) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::not_found(path)
    } else {
        StorageError::Io(err)
    }
}

/// A file handle on the local disk.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl LocalFile {
    fn from_file(path: PathBuf, file: File) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the absolute path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageFile for LocalFile {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size = (*size).max(offset + data.len() as u64);

        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::TruncateBeyondEnd {
                new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }
}

/// A file system rooted at a directory on the local disk.
///
/// # Example
///
/// ```no_run
/// use rewind_storage::{FileSystem, LocalFileSystem};
/// use std::path::Path;
///
/// let fs = LocalFileSystem::new("/var/lib/rewind");
/// fs.create_dir_all(Path::new("logs/rollback")).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    /// Creates a file system rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    /// Fsyncs the parent directory of `path` so entry creation is durable.
    #[cfg(unix)]
    fn sync_parent(full: &Path) -> StorageResult<()> {
        if let Some(parent) = full.parent() {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent(_full: &Path) -> StorageResult<()> {
        Ok(())
    }
}

impl FileSystem for LocalFileSystem {
    fn open_file(&self, path: &Path) -> StorageResult<Box<dyn StorageFile>> {
        let full = self.resolve(path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&full)
            .map_err(|e| map_io(path, e))?;
        Ok(Box::new(LocalFile::from_file(full, file)?))
    }

    fn open_or_create_file(&self, path: &Path) -> StorageResult<Box<dyn StorageFile>> {
        let full = self.resolve(path);
        let existed = full.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&full)
            .map_err(|e| map_io(path, e))?;
        if !existed {
            Self::sync_parent(&full)?;
        }
        Ok(Box::new(LocalFile::from_file(full, file)?))
    }

    fn create_file(&self, path: &Path) -> StorageResult<Box<dyn StorageFile>> {
        let full = self.resolve(path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full)
            .map_err(|e| map_io(path, e))?;
        Self::sync_parent(&full)?;
        Ok(Box::new(LocalFile::from_file(full, file)?))
    }

    fn read_file(&self, path: &Path) -> StorageResult<Vec<u8>> {
        let mut file = File::open(self.resolve(path)).map_err(|e| map_io(path, e))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let full = self.resolve(path);
        let mut file = File::create(&full).map_err(|e| map_io(path, e))?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> StorageResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path)).map_err(|e| map_io(path, e))? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        fs::create_dir_all(self.resolve(path))?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        fs::remove_file(self.resolve(path)).map_err(|e| map_io(path, e))
    }

    fn remove_dir_all(&self, path: &Path) -> StorageResult<()> {
        debug!(path = %path.display(), "removing directory tree");
        fs::remove_dir_all(self.resolve(path)).map_err(|e| map_io(path, e))
    }

    fn stat(&self, path: &Path) -> StorageResult<FileStat> {
        let metadata = fs::metadata(self.resolve(path)).map_err(|e| map_io(path, e))?;
        Ok(FileStat {
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            is_dir: metadata.is_dir(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_append_and_read() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path());

        let mut file = fs.create_file(Path::new("test.bin")).unwrap();
        assert_eq!(file.append(b"hello").unwrap(), 0);
        assert_eq!(file.append(b" world").unwrap(), 5);
        assert_eq!(file.size().unwrap(), 11);
        assert_eq!(file.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn write_at_extends_with_zeroes() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path());

        let mut file = fs.create_file(Path::new("sparse")).unwrap();
        file.write_at(4, b"ab").unwrap();
        assert_eq!(file.size().unwrap(), 6);
        assert_eq!(file.read_at(0, 6).unwrap(), vec![0, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path());

        let mut file = fs.create_file(Path::new("short")).unwrap();
        file.append(b"hello").unwrap();
        assert!(matches!(
            file.read_at(3, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn open_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path());

        let err = fs.open_file(Path::new("missing")).err().unwrap();
        assert!(err.is_not_found());

        let err = fs
            .open_or_create_file(Path::new("no/such/dir/file"))
            .err()
            .unwrap();
        assert!(err.is_not_found());
        assert!(!fs.exists(Path::new("missing")).unwrap());
    }

    #[test]
    fn persistence_across_handles() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path());

        {
            let mut file = fs.open_or_create_file(Path::new("data")).unwrap();
            file.append(b"persistent data").unwrap();
            file.sync().unwrap();
        }

        let file = fs.open_file(Path::new("data")).unwrap();
        assert_eq!(file.size().unwrap(), 15);
        assert_eq!(fs.read_file(Path::new("data")).unwrap(), b"persistent data");
    }

    #[test]
    fn truncate_only_shrinks() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path());

        let mut file = fs.create_file(Path::new("t")).unwrap();
        file.append(b"0123456789").unwrap();
        file.truncate(4).unwrap();
        assert_eq!(file.size().unwrap(), 4);
        assert!(matches!(
            file.truncate(8),
            Err(StorageError::TruncateBeyondEnd { .. })
        ));
    }

    #[test]
    fn directories_are_sorted_and_removable() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path());

        fs.create_dir_all(Path::new("a/b")).unwrap();
        fs.write_file(Path::new("a/2"), b"x").unwrap();
        fs.write_file(Path::new("a/1"), b"yy").unwrap();

        let names: Vec<_> = fs
            .read_dir(Path::new("a"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["1", "2", "b"]);
        assert_eq!(fs.stat(Path::new("a/1")).unwrap().size, 2);
        assert!(fs.stat(Path::new("a/b")).unwrap().is_dir);

        fs.remove_file(Path::new("a/1")).unwrap();
        fs.remove_dir_all(Path::new("a")).unwrap();
        assert!(!fs.exists(Path::new("a")).unwrap());
    }
}
