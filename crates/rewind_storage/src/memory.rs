//! In-memory file system for testing.

use crate::backend::{DirEntry, FileStat, FileSystem, StorageFile};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type FileData = Arc<RwLock<Vec<u8>>>;

/// A handle onto an in-memory file.
///
/// Handles opened on the same path share their contents, like file
/// descriptors onto the same inode.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFile {
    data: FileData,
}

impl InMemoryFile {
    /// Returns a copy of the file contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageFile for InMemoryFile {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn write_at(&mut self, offset: u64, new_data: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + new_data.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(new_data);
        Ok(())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;

        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd { new_size, size });
        }

        data.truncate(new_size as usize);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        // Nothing is buffered
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Tree {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, FileData>,
}

impl Tree {
    fn is_dir(&self, path: &Path) -> bool {
        path.as_os_str().is_empty() || self.dirs.contains(path)
    }

    fn parent_exists(&self, path: &Path) -> bool {
        path.parent().map_or(true, |p| self.is_dir(p))
    }
}

/// An in-memory file system.
///
/// Suitable for unit tests and ephemeral databases. Cloning the file system
/// yields another view onto the same tree.
///
/// # Example
///
/// ```rust
/// use rewind_storage::{FileSystem, InMemoryFileSystem};
/// use std::path::Path;
///
/// let fs = InMemoryFileSystem::new();
/// fs.write_file(Path::new("a"), b"xyz").unwrap();
/// assert_eq!(fs.read_file(Path::new("a")).unwrap(), b"xyz");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileSystem {
    tree: Arc<RwLock<Tree>>,
}

impl InMemoryFileSystem {
    /// Creates an empty file system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(data: FileData) -> Box<dyn StorageFile> {
        Box::new(InMemoryFile { data })
    }
}

impl FileSystem for InMemoryFileSystem {
    fn open_file(&self, path: &Path) -> StorageResult<Box<dyn StorageFile>> {
        let tree = self.tree.read();
        let data = tree
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::not_found(path))?;
        Ok(Self::handle(data))
    }

    fn open_or_create_file(&self, path: &Path) -> StorageResult<Box<dyn StorageFile>> {
        let mut tree = self.tree.write();
        if let Some(data) = tree.files.get(path) {
            return Ok(Self::handle(Arc::clone(data)));
        }
        if !tree.parent_exists(path) {
            return Err(StorageError::not_found(path));
        }
        if tree.is_dir(path) {
            return Err(StorageError::WrongKind {
                path: path.to_path_buf(),
                message: "expected a file",
            });
        }
        let data = FileData::default();
        tree.files.insert(path.to_path_buf(), Arc::clone(&data));
        Ok(Self::handle(data))
    }

    fn create_file(&self, path: &Path) -> StorageResult<Box<dyn StorageFile>> {
        let file = self.open_or_create_file(path)?;
        let data = self.tree.read().files.get(path).cloned();
        if let Some(data) = data {
            data.write().clear();
        }
        Ok(file)
    }

    fn read_file(&self, path: &Path) -> StorageResult<Vec<u8>> {
        let tree = self.tree.read();
        tree.files
            .get(path)
            .map(|data| data.read().clone())
            .ok_or_else(|| StorageError::not_found(path))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let mut file = self.create_file(path)?;
        file.append(data)?;
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> StorageResult<Vec<DirEntry>> {
        let tree = self.tree.read();
        if !tree.is_dir(path) {
            return Err(StorageError::not_found(path));
        }

        let name_of = |p: &Path| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };

        let mut entries: Vec<DirEntry> = tree
            .dirs
            .iter()
            .filter(|d| d.parent() == Some(path))
            .map(|d| DirEntry {
                name: name_of(d),
                is_dir: true,
            })
            .chain(
                tree.files
                    .keys()
                    .filter(|f| f.parent() == Some(path))
                    .map(|f| DirEntry {
                        name: name_of(f),
                        is_dir: false,
                    }),
            )
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        let mut tree = self.tree.write();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            if tree.files.contains_key(ancestor) {
                return Err(StorageError::WrongKind {
                    path: ancestor.to_path_buf(),
                    message: "expected a directory",
                });
            }
            tree.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        self.tree
            .write()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(path))
    }

    fn remove_dir_all(&self, path: &Path) -> StorageResult<()> {
        let mut tree = self.tree.write();
        if !tree.is_dir(path) {
            return Err(StorageError::not_found(path));
        }
        tree.dirs.retain(|d| !d.starts_with(path));
        tree.files.retain(|f, _| !f.starts_with(path));
        Ok(())
    }

    fn stat(&self, path: &Path) -> StorageResult<FileStat> {
        let tree = self.tree.read();
        if let Some(data) = tree.files.get(path) {
            return Ok(FileStat {
                size: data.read().len() as u64,
                is_dir: false,
            });
        }
        if tree.is_dir(path) {
            return Ok(FileStat {
                size: 0,
                is_dir: true,
            });
        }
        Err(StorageError::not_found(path))
    }
}
