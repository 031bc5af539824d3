//! Append-only buffer of checkpointed pages awaiting compaction.
//!
//! Page logs are numbered files under `logs/page/`. Only the highest
//! numbered file is appended to; compaction removes them all.
//!
//! ```text
//! | page (8) | timestamp (8) | length (4) | data (length) |
//! ```

use crate::dir::{parse_sequence_name, DatabasePaths};
use crate::error::{CoreError, CoreResult};
use crate::types::narrow;
use rewind_storage::FileSystem;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Size of a page log record header.
pub const PAGE_RECORD_HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageLocation {
    sequence: u64,
    offset: u64,
    len: u32,
}

/// Index over the page log files of one database.
#[derive(Debug)]
pub struct PageLog {
    fs: Arc<dyn FileSystem>,
    paths: DatabasePaths,
    sequence: u64,
    index: BTreeMap<u64, PageLocation>,
}

impl PageLog {
    /// Opens the page log and indexes every record on disk.
    pub fn open(fs: Arc<dyn FileSystem>, paths: DatabasePaths) -> CoreResult<Self> {
        let mut log = Self {
            fs,
            paths,
            sequence: 1,
            index: BTreeMap::new(),
        };
        log.reload()?;
        Ok(log)
    }

    /// Returns the page log file numbers on disk, ascending.
    pub fn sequences(&self) -> CoreResult<Vec<u64>> {
        match self.fs.read_dir(&self.paths.page_log_dir()) {
            Ok(entries) => Ok(entries
                .iter()
                .filter_map(|entry| parse_sequence_name(&entry.name))
                .collect()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuilds the index from the files on disk.
    ///
    /// A torn record at the end of a file is cut off.
    pub fn reload(&mut self) -> CoreResult<()> {
        self.index.clear();
        let sequences = self.sequences()?;
        for &sequence in &sequences {
            self.scan(sequence)?;
        }
        self.sequence = sequences.last().copied().unwrap_or(self.sequence);
        Ok(())
    }

    fn scan(&mut self, sequence: u64) -> CoreResult<()> {
        let path = self.paths.page_log(sequence);
        let bytes = self.fs.read_file(&path)?;

        let mut offset = 0usize;
        while offset < bytes.len() {
            let Some(header) = bytes.get(offset..offset + PAGE_RECORD_HEADER_SIZE) else {
                break;
            };
            let mut page = [0u8; 8];
            page.copy_from_slice(&header[0..8]);
            let mut len = [0u8; 4];
            len.copy_from_slice(&header[16..20]);
            let len = u32::from_le_bytes(len);

            let data = offset + PAGE_RECORD_HEADER_SIZE;
            if data + len as usize > bytes.len() {
                break;
            }
            self.index.insert(
                u64::from_le_bytes(page),
                PageLocation {
                    sequence,
                    offset: data as u64,
                    len,
                },
            );
            offset = data + len as usize;
        }

        if offset < bytes.len() {
            warn!(
                path = %path.display(),
                bytes = bytes.len() - offset,
                "discarding torn page log record"
            );
            let mut file = self.fs.open_file(&path)?;
            file.truncate(offset as u64)?;
            file.sync()?;
        }
        Ok(())
    }

    /// Appends page images written at `timestamp` and syncs the log.
    pub fn append(&mut self, timestamp: i64, pages: &BTreeMap<u64, Vec<u8>>) -> CoreResult<()> {
        if pages.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        let mut locations = Vec::with_capacity(pages.len());
        for (&page, image) in pages {
            let len: u32 = narrow(image.len(), "page image length")?;
            buf.extend_from_slice(&page.to_le_bytes());
            buf.extend_from_slice(&timestamp.to_le_bytes());
            buf.extend_from_slice(&len.to_le_bytes());
            locations.push((page, buf.len() as u64, len));
            buf.extend_from_slice(image);
        }

        let dir = self.paths.page_log_dir();
        self.fs.create_dir_all(&dir)?;
        let mut file = self.fs.open_or_create_file(&self.paths.page_log(self.sequence))?;
        let base = file.append(&buf)?;
        file.sync()?;

        for (page, offset, len) in locations {
            self.index.insert(
                page,
                PageLocation {
                    sequence: self.sequence,
                    offset: base + offset,
                    len,
                },
            );
        }
        Ok(())
    }

    /// Returns the latest logged image of `page`.
    pub fn read(&self, page: u64) -> CoreResult<Option<Vec<u8>>> {
        let Some(location) = self.index.get(&page) else {
            return Ok(None);
        };
        let file = self.fs.open_file(&self.paths.page_log(location.sequence))?;
        let data = file.read_at(location.offset, location.len as usize)?;
        Ok(Some(data))
    }

    /// Returns the latest logged image of every page.
    pub fn pages(&self) -> CoreResult<BTreeMap<u64, Vec<u8>>> {
        let mut pages = BTreeMap::new();
        for &page in self.index.keys() {
            let image = self.read(page)?.ok_or_else(|| {
                CoreError::invalid_operation(format!("page {page} vanished from the page log"))
            })?;
            pages.insert(page, image);
        }
        Ok(pages)
    }

    /// Returns the highest page number in the log.
    #[must_use]
    pub fn max_page(&self) -> Option<u64> {
        self.index.keys().next_back().copied()
    }

    /// Returns true if no pages are awaiting compaction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Removes every page log file.
    ///
    /// The next append starts a new file.
    pub fn clear(&mut self) -> CoreResult<()> {
        for sequence in self.sequences()? {
            self.fs.remove_file(&self.paths.page_log(sequence))?;
        }
        debug!(sequence = self.sequence, "cleared page log");
        self.index.clear();
        self.sequence += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DatabaseKey;
    use rewind_storage::InMemoryFileSystem;

    fn paths() -> DatabasePaths {
        DatabasePaths::new(&DatabaseKey::new("db", "main"))
    }

    fn open(fs: &Arc<dyn FileSystem>) -> PageLog {
        PageLog::open(Arc::clone(fs), paths()).unwrap()
    }

    #[test]
    fn latest_image_wins() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
        let mut log = open(&fs);
        log.append(1, &BTreeMap::from([(1, vec![1; 8]), (2, vec![2; 8])]))
            .unwrap();
        log.append(2, &BTreeMap::from([(1, vec![9; 8])])).unwrap();

        assert_eq!(log.read(1).unwrap(), Some(vec![9; 8]));
        assert_eq!(log.read(2).unwrap(), Some(vec![2; 8]));
        assert_eq!(log.read(3).unwrap(), None);
        assert_eq!(log.max_page(), Some(2));
    }

    #[test]
    fn index_survives_reopen() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
        open(&fs)
            .append(1, &BTreeMap::from([(5, vec![5; 16])]))
            .unwrap();

        let log = open(&fs);
        assert_eq!(log.pages().unwrap(), BTreeMap::from([(5, vec![5; 16])]));
    }

    #[test]
    fn clear_starts_new_file() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
        let mut log = open(&fs);
        log.append(1, &BTreeMap::from([(1, vec![1; 8])])).unwrap();
        log.clear().unwrap();
        assert!(log.is_empty());
        assert!(log.sequences().unwrap().is_empty());

        log.append(2, &BTreeMap::from([(2, vec![2; 8])])).unwrap();
        assert_eq!(log.sequences().unwrap(), vec![2]);
        assert_eq!(open(&fs).read(2).unwrap(), Some(vec![2; 8]));
    }

    #[test]
    fn torn_record_is_cut_off() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
        open(&fs)
            .append(1, &BTreeMap::from([(1, vec![1; 8])]))
            .unwrap();
        let path = paths().page_log(1);
        let mut bytes = fs.read_file(&path).unwrap();
        bytes.extend_from_slice(&[7; 25]);
        fs.write_file(&path, &bytes).unwrap();

        let mut log = open(&fs);
        assert_eq!(fs.stat(&path).unwrap().size, 28);
        log.append(2, &BTreeMap::from([(3, vec![3; 8])])).unwrap();
        assert_eq!(open(&fs).read(3).unwrap(), Some(vec![3; 8]));
    }
}
