//! Page addressing within range files.
//!
//! Pages are numbered from 1. Range file `i` holds pages
//! `(i - 1) * range_size + 1 ..= i * range_size`, each at
//! `(page - first_page(i)) * page_size`.

use crate::config::Config;
use crate::dir::{parse_sequence_name, DatabasePaths};
use crate::error::{CoreError, CoreResult};
use crate::types::narrow;
use rewind_storage::FileSystem;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Returns the index of the range file holding `page`, or 0 for page 0.
#[must_use]
pub const fn range_index(page: u64, range_size: u64) -> u64 {
    if page == 0 {
        0
    } else {
        (page - 1) / range_size + 1
    }
}

/// Returns the first page held by range file `index`.
#[must_use]
pub const fn first_page(index: u64, range_size: u64) -> u64 {
    (index - 1) * range_size + 1
}

/// Returns how many of the first `page_count` pages range file `index` holds.
#[must_use]
pub fn pages_in_range(index: u64, page_count: u64, range_size: u64) -> u64 {
    let first = first_page(index, range_size);
    if page_count < first {
        0
    } else {
        (page_count - first + 1).min(range_size)
    }
}

/// Reads and writes pages stored in range files.
#[derive(Debug, Clone)]
pub struct RangeFiles {
    fs: Arc<dyn FileSystem>,
    paths: DatabasePaths,
    page_size: u64,
    range_size: u64,
}

impl RangeFiles {
    /// Creates an accessor for the range files at `paths`.
    pub fn new(fs: Arc<dyn FileSystem>, paths: DatabasePaths, config: &Config) -> Self {
        Self {
            fs,
            paths,
            page_size: config.page_size,
            range_size: config.range_size,
        }
    }

    /// Returns the byte offset of `page` within its range file.
    #[must_use]
    pub fn page_offset(&self, page: u64) -> u64 {
        let index = range_index(page, self.range_size);
        (page - first_page(index, self.range_size)) * self.page_size
    }

    /// Reads one page, or `None` if it was never written.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for page 0.
    pub fn read_page(&self, page: u64) -> CoreResult<Option<Vec<u8>>> {
        if page == 0 {
            return Err(CoreError::invalid_operation("pages are numbered from 1"));
        }

        let path = self.paths.range_file(range_index(page, self.range_size));
        let file = match self.fs.open_file(&path) {
            Ok(file) => file,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let offset = self.page_offset(page);
        if file.size()? < offset + self.page_size {
            return Ok(None);
        }
        Ok(Some(file.read_at(offset, narrow(self.page_size, "page_size")?)?))
    }

    /// Writes pages into their range files and syncs each file touched.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for page 0 or an image of the wrong size.
    pub fn write_pages(&self, pages: &BTreeMap<u64, Vec<u8>>) -> CoreResult<()> {
        let mut by_range: BTreeMap<u64, Vec<(u64, &[u8])>> = BTreeMap::new();
        for (&page, image) in pages {
            if page == 0 {
                return Err(CoreError::invalid_operation("pages are numbered from 1"));
            }
            if image.len() as u64 != self.page_size {
                return Err(CoreError::invalid_operation(format!(
                    "page {page} is {} bytes, expected {}",
                    image.len(),
                    self.page_size
                )));
            }
            by_range
                .entry(range_index(page, self.range_size))
                .or_default()
                .push((page, image));
        }

        if by_range.is_empty() {
            return Ok(());
        }
        self.fs.create_dir_all(&self.paths.ranges_dir())?;

        for (index, images) in by_range {
            let mut file = self.fs.open_or_create_file(&self.paths.range_file(index))?;
            for (page, image) in images {
                file.write_at(self.page_offset(page), image)?;
            }
            file.sync()?;
        }
        Ok(())
    }

    /// Returns the indexes of the range files on disk, ascending.
    pub fn indexes(&self) -> CoreResult<Vec<u64>> {
        match self.fs.read_dir(&self.paths.ranges_dir()) {
            Ok(entries) => Ok(entries
                .iter()
                .filter_map(|entry| parse_sequence_name(&entry.name))
                .collect()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Resizes the range files to hold exactly `page_count` pages.
    ///
    /// Range files past the last page are removed. The remaining files are
    /// truncated, or zero-extended when pages were never written, so the
    /// files together span `page_count * page_size` bytes.
    pub fn resize_to(&self, page_count: u64) -> CoreResult<()> {
        let last = range_index(page_count, self.range_size);
        for index in self.indexes()? {
            if index > last {
                let path = self.paths.range_file(index);
                debug!(path = %path.display(), "removing range file past page count");
                self.fs.remove_file(&path)?;
            }
        }
        if last == 0 {
            return Ok(());
        }

        self.fs.create_dir_all(&self.paths.ranges_dir())?;
        for index in 1..=last {
            let keep = pages_in_range(index, page_count, self.range_size) * self.page_size;
            let mut file = self.fs.open_or_create_file(&self.paths.range_file(index))?;
            let size = file.size()?;
            if size > keep {
                file.truncate(keep)?;
            } else if size < keep {
                file.write_at(keep - 1, &[0])?;
            } else {
                continue;
            }
            file.sync()?;
        }
        Ok(())
    }

    /// Returns the combined size of all range files.
    pub fn total_size(&self) -> CoreResult<u64> {
        let mut total = 0;
        for index in self.indexes()? {
            total += self.fs.stat(&self.paths.range_file(index))?.size;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DatabaseKey;
    use rewind_storage::InMemoryFileSystem;

    fn ranges() -> (Arc<dyn FileSystem>, RangeFiles) {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
        let config = Config::default().page_size(512).range_size(4);
        let paths = DatabasePaths::new(&DatabaseKey::new("db", "main"));
        (Arc::clone(&fs), RangeFiles::new(fs, paths, &config))
    }

    fn image(fill: u8) -> Vec<u8> {
        vec![fill; 512]
    }

    #[test]
    fn addressing() {
        assert_eq!(range_index(0, 4), 0);
        assert_eq!(range_index(1, 4), 1);
        assert_eq!(range_index(4, 4), 1);
        assert_eq!(range_index(5, 4), 2);
        assert_eq!(first_page(2, 4), 5);
        assert_eq!(pages_in_range(2, 6, 4), 2);
        assert_eq!(pages_in_range(1, 6, 4), 4);
        assert_eq!(pages_in_range(3, 6, 4), 0);
    }

    #[test]
    fn write_then_read() {
        let (_fs, ranges) = ranges();
        let pages = BTreeMap::from([(1, image(1)), (3, image(3)), (6, image(6))]);
        ranges.write_pages(&pages).unwrap();

        assert_eq!(ranges.read_page(1).unwrap(), Some(image(1)));
        assert_eq!(ranges.read_page(6).unwrap(), Some(image(6)));
        assert_eq!(ranges.read_page(2).unwrap(), Some(vec![0; 512]));
        assert_eq!(ranges.read_page(4).unwrap(), None);
        assert_eq!(ranges.read_page(7).unwrap(), None);
        assert_eq!(ranges.read_page(9).unwrap(), None);
        assert_eq!(ranges.indexes().unwrap(), vec![1, 2]);
    }

    #[test]
    fn rejects_wrong_image_size() {
        let (_fs, ranges) = ranges();
        let pages = BTreeMap::from([(1, vec![0; 10])]);
        assert!(ranges.write_pages(&pages).is_err());
    }

    #[test]
    fn resize_drops_trailing_pages() {
        let (fs, ranges) = ranges();
        let pages = (1..=10).map(|p| (p, image(p as u8))).collect();
        ranges.write_pages(&pages).unwrap();

        ranges.resize_to(5).unwrap();
        assert_eq!(ranges.indexes().unwrap(), vec![1, 2]);
        let second = DatabasePaths::new(&DatabaseKey::new("db", "main")).range_file(2);
        assert_eq!(fs.stat(&second).unwrap().size, 512);
        assert_eq!(ranges.read_page(5).unwrap(), Some(image(5)));
        assert_eq!(ranges.read_page(6).unwrap(), None);
        assert_eq!(ranges.total_size().unwrap(), 5 * 512);

        ranges.resize_to(0).unwrap();
        assert!(ranges.indexes().unwrap().is_empty());
    }

    #[test]
    fn resize_fills_sparse_ranges() {
        let (_fs, ranges) = ranges();
        ranges
            .write_pages(&BTreeMap::from([(1, image(1)), (6, image(6))]))
            .unwrap();

        ranges.resize_to(9).unwrap();
        assert_eq!(ranges.indexes().unwrap(), vec![1, 2, 3]);
        assert_eq!(ranges.total_size().unwrap(), 9 * 512);
        assert_eq!(ranges.read_page(4).unwrap(), Some(vec![0; 512]));
        assert_eq!(ranges.read_page(6).unwrap(), Some(image(6)));
    }
}
