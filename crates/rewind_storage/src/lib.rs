//! # Rewind Storage
//!
//! Durable file-system abstraction for Rewind.
//!
//! This crate is the lowest layer of the workspace. It exposes a small,
//! POSIX-like contract that the rollback logs, snapshots, range files and
//! backup archives are written through. Files are **opaque byte stores**:
//! nothing in this crate interprets the formats stored in them.
//!
//! ## Design Principles
//!
//! - Paths are relative to the root of the file system instance
//! - Missing files and directories classify as [`StorageError::is_not_found`]
//! - Implementations must be `Send + Sync` for concurrent access
//!
//! ## Available File Systems
//!
//! - [`InMemoryFileSystem`] - For testing and ephemeral databases
//! - [`LocalFileSystem`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use rewind_storage::{FileSystem, InMemoryFileSystem, StorageFile};
//! use std::path::Path;
//!
//! let fs = InMemoryFileSystem::new();
//! fs.create_dir_all(Path::new("logs")).unwrap();
//! let mut file = fs.create_file(Path::new("logs/a")).unwrap();
//! let offset = file.append(b"hello world").unwrap();
//! assert_eq!(file.read_at(offset, 5).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{DirEntry, FileStat, FileSystem, StorageFile};
pub use error::{StorageError, StorageResult};
pub use file::{LocalFile, LocalFileSystem};
pub use memory::{InMemoryFile, InMemoryFileSystem};
