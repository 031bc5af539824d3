//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file or directory does not exist.
    #[error("not found: {}", path.display())]
    NotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// A file was expected but a directory was found, or the reverse.
    #[error("wrong entry kind at {}: {message}", path.display())]
    WrongKind {
        /// The offending path.
        path: PathBuf,
        /// What was expected.
        message: &'static str,
    },

    /// Attempted to read beyond the end of a file.
    #[error("read beyond end of file: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current file size.
        size: u64,
    },

    /// Attempted to grow a file through `truncate`.
    #[error("cannot truncate to {new_size} bytes, file is only {size} bytes")]
    TruncateBeyondEnd {
        /// The requested size.
        new_size: u64,
        /// The current file size.
        size: u64,
    },
}

impl StorageError {
    /// Creates a not-found error for `path`.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Returns true when the error means the path does not exist.
    ///
    /// Both the explicit [`StorageError::NotFound`] variant and raw I/O
    /// errors of kind [`io::ErrorKind::NotFound`] qualify.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classification() {
        assert!(StorageError::not_found("a/b").is_not_found());
        assert!(StorageError::Io(io::Error::from(io::ErrorKind::NotFound)).is_not_found());
        assert!(!StorageError::Io(io::Error::from(io::ErrorKind::PermissionDenied)).is_not_found());
        assert!(!StorageError::TruncateBeyondEnd {
            new_size: 2,
            size: 1
        }
        .is_not_found());
    }
}
