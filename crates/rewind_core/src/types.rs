//! Core type definitions for Rewind.

use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds in one hour.
pub const NANOS_PER_HOUR: i64 = 3_600 * 1_000_000_000;

/// Nanoseconds in one day.
pub const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;

/// Identity of one database branch.
///
/// All on-disk state for a branch lives under a directory named after the
/// content hash of `database_id:branch_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseKey {
    database_id: String,
    branch_id: String,
}

impl DatabaseKey {
    /// Creates a key for a database branch.
    pub fn new(database_id: impl Into<String>, branch_id: impl Into<String>) -> Self {
        Self {
            database_id: database_id.into(),
            branch_id: branch_id.into(),
        }
    }

    /// Returns the database identifier.
    #[must_use]
    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// Returns the branch identifier.
    #[must_use]
    pub fn branch_id(&self) -> &str {
        &self.branch_id
    }

    /// Returns the lowercase hex SHA-256 of `database_id:branch_id`.
    #[must_use]
    pub fn hash(&self) -> String {
        to_hex(&Sha256::digest(format!("{}:{}", self.database_id, self.branch_id)))
    }
}

impl fmt::Display for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database_id, self.branch_id)
    }
}

/// The database had exactly `page_count` pages as of `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RestorePoint {
    /// Unix timestamp in nanoseconds.
    pub timestamp: i64,
    /// Number of pages in the database at that instant.
    pub page_count: u64,
}

impl RestorePoint {
    /// Creates a restore point.
    #[must_use]
    pub const fn new(timestamp: i64, page_count: u64) -> Self {
        Self {
            timestamp,
            page_count,
        }
    }
}

/// Returns the start of the UTC hour containing `timestamp`.
#[must_use]
pub const fn hour_bucket(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(NANOS_PER_HOUR)
}

/// Returns the start of the UTC day containing `timestamp`.
#[must_use]
pub const fn day_bucket(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(NANOS_PER_DAY)
}

/// Returns the current wall-clock time in Unix nanoseconds.
///
/// # Errors
///
/// Returns `NumericRange` if the clock is outside the `i64` nanosecond range.
pub fn now_nanos() -> CoreResult<i64> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    narrow(nanos, "timestamp")
}

/// Returns `bytes` as lowercase hex.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Converts between integer widths, failing instead of truncating.
///
/// # Errors
///
/// Returns `NumericRange` naming `field` when `value` does not fit `U`.
pub fn narrow<T, U>(value: T, field: &'static str) -> CoreResult<U>
where
    T: Copy + fmt::Display,
    U: TryFrom<T>,
{
    U::try_from(value).map_err(|_| CoreError::numeric_range(field, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_truncate_to_utc_boundaries() {
        let ts = 5 * NANOS_PER_DAY + 3 * NANOS_PER_HOUR + 17;
        assert_eq!(hour_bucket(ts), 5 * NANOS_PER_DAY + 3 * NANOS_PER_HOUR);
        assert_eq!(day_bucket(ts), 5 * NANOS_PER_DAY);
        assert_eq!(hour_bucket(NANOS_PER_HOUR), NANOS_PER_HOUR);
        assert_eq!(hour_bucket(-1), -NANOS_PER_HOUR);
    }

    #[test]
    fn hex_is_lowercase_and_padded() {
        assert_eq!(to_hex(&[]), "");
        assert_eq!(to_hex(&[0x00, 0x0f, 0xab, 0xff]), "000fabff");
    }

    #[test]
    fn key_hash_is_stable_and_branch_scoped() {
        let a = DatabaseKey::new("db", "main");
        let b = DatabaseKey::new("db", "dev");
        assert_eq!(a.hash().len(), 64);
        assert_eq!(a.hash(), DatabaseKey::new("db", "main").hash());
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.to_string(), "db/main");
    }

    #[test]
    fn narrow_rejects_overflow() {
        let ok: u32 = narrow(7_u64, "page_number").unwrap();
        assert_eq!(ok, 7);

        let err = narrow::<u64, u32>(u64::from(u32::MAX) + 1, "page_number").unwrap_err();
        assert!(matches!(err, CoreError::NumericRange { field: "page_number", .. }));

        assert!(narrow::<i64, u64>(-1, "timestamp").is_err());
    }

    #[test]
    fn now_is_positive() {
        assert!(now_nanos().unwrap() > 0);
    }
}
