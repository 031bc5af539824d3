//! Store configuration.

use crate::error::{CoreError, CoreResult};

/// Default size of a database page in bytes.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Default number of pages held by one range file.
pub const DEFAULT_RANGE_SIZE: u64 = 4096;

/// Default cap on the uncompressed payload of one backup part (100 GiB).
pub const DEFAULT_MAX_PART_SIZE: u64 = 100 * 1024 * 1024 * 1024;

/// Configuration shared by the page store, loggers and backups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Fixed size of a page in bytes.
    pub page_size: u64,

    /// Number of pages stored in each range file.
    pub range_size: u64,

    /// Payload bytes written to a backup part before a new part is started.
    pub max_part_size: u64,

    /// Whether rollback log appends are flushed as they are written.
    ///
    /// Commits, rollbacks and restore points are always synced.
    pub sync_on_write: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            range_size: DEFAULT_RANGE_SIZE,
            max_part_size: DEFAULT_MAX_PART_SIZE,
            sync_on_write: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, size: u64) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the number of pages per range file.
    #[must_use]
    pub const fn range_size(mut self, pages: u64) -> Self {
        self.range_size = pages;
        self
    }

    /// Sets the maximum backup part size.
    #[must_use]
    pub const fn max_part_size(mut self, size: u64) -> Self {
        self.max_part_size = size;
        self
    }

    /// Sets whether rollback log appends are flushed immediately.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Returns the size of a full range file in bytes.
    #[must_use]
    pub const fn range_file_size(&self) -> u64 {
        self.page_size * self.range_size
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the page size is not a power of two in
    /// `512..=65536`, or when the range size or part size is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if !(512..=65536).contains(&self.page_size) || !self.page_size.is_power_of_two() {
            return Err(CoreError::invalid_config(format!(
                "page size {} must be a power of two between 512 and 65536",
                self.page_size
            )));
        }
        if self.range_size == 0 {
            return Err(CoreError::invalid_config("range size must be positive"));
        }
        if self.max_part_size == 0 {
            return Err(CoreError::invalid_config("max part size must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.max_part_size, 107_374_182_400);
        assert!(config.sync_on_write);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .page_size(1024)
            .range_size(8)
            .max_part_size(1)
            .sync_on_write(false);

        assert_eq!(config.range_file_size(), 8192);
        assert_eq!(config.max_part_size, 1);
        assert!(!config.sync_on_write);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::new().page_size(1000).validate().is_err());
        assert!(Config::new().page_size(256).validate().is_err());
        assert!(Config::new().range_size(0).validate().is_err());
        assert!(Config::new().max_part_size(0).validate().is_err());
    }
}
