//! Database directory layout.
//!
//! Every database branch owns a directory named after its content hash:
//!
//! ```text
//! <hash>/
//! ├─ ranges/
//! │  ├─ 0000000001          # Range file (pages 1..=range_size)
//! │  ├─ 0000000002
//! │  └─ _METADATA           # Page count (u64 LE) + page size
//! ├─ logs/
//! │  ├─ page/0000000001     # Page log awaiting compaction
//! │  ├─ rollback/<hour ns>  # Hourly rollback logs
//! │  └─ snapshots/<day ns>  # Daily restore point logs
//! └─ backups/
//!    └─ <restore point ns>/backup-<n>.tar.gz
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::DatabaseKey;
use std::path::{Path, PathBuf};

/// Directory holding range files and the metadata file.
const RANGES_DIR: &str = "ranges";
/// Name of the metadata file inside the ranges directory.
pub const METADATA_FILE: &str = "_METADATA";
const PAGE_LOG_DIR: &str = "logs/page";
const ROLLBACK_DIR: &str = "logs/rollback";
const SNAPSHOTS_DIR: &str = "logs/snapshots";
const BACKUPS_DIR: &str = "backups";

/// Resolves the paths of one database branch, relative to the file system root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabasePaths {
    root: PathBuf,
}

impl DatabasePaths {
    /// Returns the layout for `key`.
    #[must_use]
    pub fn new(key: &DatabaseKey) -> Self {
        Self {
            root: PathBuf::from(key.hash()),
        }
    }

    /// Returns the database root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding range files.
    #[must_use]
    pub fn ranges_dir(&self) -> PathBuf {
        self.root.join(RANGES_DIR)
    }

    /// Returns the path of range file `index` (zero padded).
    #[must_use]
    pub fn range_file(&self, index: u64) -> PathBuf {
        self.ranges_dir().join(sequence_name(index))
    }

    /// Returns the path of the metadata file.
    #[must_use]
    pub fn metadata_file(&self) -> PathBuf {
        self.ranges_dir().join(METADATA_FILE)
    }

    /// Returns the directory holding page logs.
    #[must_use]
    pub fn page_log_dir(&self) -> PathBuf {
        self.root.join(PAGE_LOG_DIR)
    }

    /// Returns the path of page log `sequence` (zero padded).
    #[must_use]
    pub fn page_log(&self, sequence: u64) -> PathBuf {
        self.page_log_dir().join(sequence_name(sequence))
    }

    /// Returns the directory holding hourly rollback logs.
    #[must_use]
    pub fn rollback_dir(&self) -> PathBuf {
        self.root.join(ROLLBACK_DIR)
    }

    /// Returns the path of the rollback log for an hour bucket.
    #[must_use]
    pub fn rollback_log(&self, hour: i64) -> PathBuf {
        self.rollback_dir().join(hour.to_string())
    }

    /// Returns the directory holding daily snapshot logs.
    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR)
    }

    /// Returns the path of the snapshot log for a day bucket.
    #[must_use]
    pub fn snapshot(&self, day: i64) -> PathBuf {
        self.snapshots_dir().join(day.to_string())
    }

    /// Returns the directory holding all backups.
    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    /// Returns the directory of the backup taken at a restore point.
    #[must_use]
    pub fn backup_dir(&self, restore_point: i64) -> PathBuf {
        self.backups_dir().join(restore_point.to_string())
    }

    /// Returns the path of one backup part.
    #[must_use]
    pub fn backup_part(&self, restore_point: i64, part: u32) -> PathBuf {
        self.backup_dir(restore_point).join(backup_part_name(part))
    }
}

/// Returns the zero-padded file name of a range file or page log.
#[must_use]
pub fn sequence_name(index: u64) -> String {
    format!("{index:010}")
}

/// Parses a zero-padded file name, returning `None` for other files.
#[must_use]
pub fn parse_sequence_name(name: &str) -> Option<u64> {
    if name.len() == 10 && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

/// Returns the file name of backup part `part`.
#[must_use]
pub fn backup_part_name(part: u32) -> String {
    format!("backup-{part}.tar.gz")
}

/// Parses a backup part file name, returning its number.
#[must_use]
pub fn parse_backup_part_name(name: &str) -> Option<u32> {
    name.strip_prefix("backup-")?
        .strip_suffix(".tar.gz")?
        .parse()
        .ok()
}

/// Parses a timestamp-named log or backup entry.
///
/// # Errors
///
/// Returns `InvalidBucketName` if `name` is not a decimal timestamp.
pub fn parse_bucket_name(dir: &Path, name: &str) -> CoreResult<i64> {
    name.parse().map_err(|_| CoreError::InvalidBucketName {
        name: name.to_string(),
        dir: dir.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_correct() {
        let key = DatabaseKey::new("db", "main");
        let paths = DatabasePaths::new(&key);
        let root = PathBuf::from(key.hash());

        assert_eq!(paths.range_file(3), root.join("ranges/0000000003"));
        assert_eq!(paths.metadata_file(), root.join("ranges/_METADATA"));
        assert_eq!(paths.page_log(1), root.join("logs/page/0000000001"));
        assert_eq!(paths.rollback_log(3600), root.join("logs/rollback/3600"));
        assert_eq!(paths.snapshot(0), root.join("logs/snapshots/0"));
        assert_eq!(
            paths.backup_part(42, 2),
            root.join("backups/42/backup-2.tar.gz")
        );
    }

    #[test]
    fn file_names_round_trip() {
        assert_eq!(parse_sequence_name(&sequence_name(12)), Some(12));
        assert_eq!(parse_sequence_name(METADATA_FILE), None);
        assert_eq!(parse_sequence_name("12"), None);

        assert_eq!(parse_backup_part_name(&backup_part_name(10)), Some(10));
        assert_eq!(parse_backup_part_name("backup-x.tar.gz"), None);
        assert_eq!(parse_backup_part_name("notes.txt"), None);
    }

    #[test]
    fn bucket_names_must_be_numeric() {
        let dir = Path::new("logs/rollback");
        assert_eq!(parse_bucket_name(dir, "7200").unwrap(), 7200);
        assert!(matches!(
            parse_bucket_name(dir, "7200.tmp"),
            Err(CoreError::InvalidBucketName { .. })
        ));
    }
}
