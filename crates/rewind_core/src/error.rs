//! Error types for Rewind core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Rewind core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage collaborator error.
    #[error("storage error: {0}")]
    Storage(#[from] rewind_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The database has never been checkpointed, so there is nothing to back up.
    #[error("backup has no restore point")]
    BackupNoRestorePoint,

    /// The requested backup directory or its archive entries are missing.
    #[error("backup not found for restore point {timestamp}")]
    RestoreBackupNotFound {
        /// Restore point timestamp that was looked up.
        timestamp: i64,
    },

    /// A range file implied by the restore point is empty.
    #[error("range file {index} is empty")]
    BackupRangeFileEmpty {
        /// Range file index.
        index: u64,
    },

    /// No restore point exists with exactly this timestamp.
    #[error("restore point not found: {timestamp}")]
    RestorePointNotFound {
        /// Timestamp that was looked up.
        timestamp: i64,
    },

    /// Another backup of the same database holds the backup lock.
    #[error("a backup is already running for database {database}")]
    BackupAlreadyRunning {
        /// Content hash of the database.
        database: String,
    },

    /// Payload hash does not match the hash stored in the record.
    #[error("checksum mismatch for page {page_number}")]
    ChecksumMismatch {
        /// Page the corrupted entry belongs to.
        page_number: u64,
    },

    /// A record started with an unknown identifier.
    #[error("invalid identifier {found:?} at offset {offset}")]
    InvalidIdentifier {
        /// The four bytes that were found.
        found: [u8; 4],
        /// File offset of the record.
        offset: u64,
    },

    /// Rollback log is corrupted or malformed.
    #[error("rollback log corruption: {message}")]
    RollbackLogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Snapshot log is corrupted or malformed.
    #[error("snapshot corruption: {message}")]
    SnapshotCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A page image could not be decompressed.
    #[error("decompression failed: {message}")]
    Decompression {
        /// Description of the failure.
        message: String,
    },

    /// A value does not fit the width of its on-disk field.
    #[error("numeric value {value} out of range for {field}")]
    NumericRange {
        /// Field being written or read.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// A log or backup directory entry is not a valid timestamp name.
    #[error("invalid bucket name {name:?} in {}", dir.display())]
    InvalidBucketName {
        /// The offending entry name.
        name: String,
        /// Directory that was scanned.
        dir: PathBuf,
    },

    /// Configuration value is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a rollback log corruption error.
    pub fn rollback_corruption(message: impl Into<String>) -> Self {
        Self::RollbackLogCorruption {
            message: message.into(),
        }
    }

    /// Creates a snapshot corruption error.
    pub fn snapshot_corruption(message: impl Into<String>) -> Self {
        Self::SnapshotCorruption {
            message: message.into(),
        }
    }

    /// Creates a decompression error.
    pub fn decompression(message: impl Into<String>) -> Self {
        Self::Decompression {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a numeric range error.
    pub fn numeric_range(field: &'static str, value: impl ToString) -> Self {
        Self::NumericRange {
            field,
            value: value.to_string(),
        }
    }

    /// Returns true for errors that indicate on-disk corruption.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::InvalidIdentifier { .. }
                | Self::RollbackLogCorruption { .. }
                | Self::SnapshotCorruption { .. }
                | Self::Decompression { .. }
                | Self::NumericRange { .. }
                | Self::InvalidBucketName { .. }
        )
    }

    /// Returns true when retrying later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackupAlreadyRunning { .. })
    }

    /// Returns true for typed not-found outcomes, including missing files.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::RestoreBackupNotFound { .. } | Self::RestorePointNotFound { .. } => true,
            Self::Storage(e) => e.is_not_found(),
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
