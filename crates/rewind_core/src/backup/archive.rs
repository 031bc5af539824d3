//! Size-capped tar+gzip backup parts.

use crate::dir::backup_part_name;
use crate::error::{CoreError, CoreResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rewind_storage::{FileSystem, StorageFile};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Adapts a [`StorageFile`] to [`io::Write`] by appending.
pub struct StorageWriter {
    file: Box<dyn StorageFile>,
}

impl StorageWriter {
    /// Wraps `file`; writes go to its end.
    pub fn new(file: Box<dyn StorageFile>) -> Self {
        Self { file }
    }

    /// Syncs the underlying file.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.file.sync()?;
        Ok(())
    }
}

impl Write for StorageWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.append(buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush().map_err(io::Error::other)
    }
}

/// Adapts a [`StorageFile`] to [`io::Read`] from its start.
pub struct StorageReader {
    file: Box<dyn StorageFile>,
    position: u64,
    size: u64,
}

impl StorageReader {
    /// Wraps `file`, reading the bytes present now.
    pub fn new(file: Box<dyn StorageFile>) -> CoreResult<Self> {
        let size = file.size()?;
        Ok(Self {
            file,
            position: 0,
            size,
        })
    }
}

impl Read for StorageReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.size - self.position;
        let len = (buf.len() as u64).min(remaining) as usize;
        if len == 0 {
            return Ok(0);
        }
        let data = self
            .file
            .read_at(self.position, len)
            .map_err(io::Error::other)?;
        buf[..len].copy_from_slice(&data);
        self.position += len as u64;
        Ok(len)
    }
}

type PartBuilder = tar::Builder<GzEncoder<StorageWriter>>;

/// Writes files into numbered `backup-<n>.tar.gz` parts.
///
/// A part is closed once the file payload written to it reaches
/// `max_part_size`, so every part holds at least one file.
pub struct PartWriter {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
    max_part_size: u64,
    part: u32,
    written: u64,
    builder: Option<PartBuilder>,
    parts: Vec<PathBuf>,
}

impl PartWriter {
    /// Starts writing parts into `dir`, replacing anything already there.
    pub fn create(fs: Arc<dyn FileSystem>, dir: PathBuf, max_part_size: u64) -> CoreResult<Self> {
        match fs.remove_dir_all(&dir) {
            Ok(()) => debug!(dir = %dir.display(), "replacing existing backup"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        fs.create_dir_all(&dir)?;

        Ok(Self {
            fs,
            dir,
            max_part_size,
            part: 0,
            written: 0,
            builder: None,
            parts: Vec::new(),
        })
    }

    fn open_part(&mut self) -> CoreResult<PartBuilder> {
        self.part += 1;
        self.written = 0;
        let path = self.dir.join(backup_part_name(self.part));
        let file = self.fs.create_file(&path)?;
        debug!(path = %path.display(), "started backup part");
        self.parts.push(path);

        let encoder = GzEncoder::new(StorageWriter::new(file), Compression::default());
        Ok(tar::Builder::new(encoder))
    }

    fn close_part(builder: PartBuilder) -> CoreResult<()> {
        let encoder = builder.into_inner()?;
        let mut writer = encoder.finish()?;
        writer.sync()
    }

    /// Adds a regular file named `name`.
    pub fn add_file(&mut self, name: &str, data: &[u8]) -> CoreResult<()> {
        let mut builder = match self.builder.take() {
            Some(builder) => builder,
            None => self.open_part()?,
        };

        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, name, data)?;
        self.written += data.len() as u64;

        if self.written >= self.max_part_size {
            info!(part = self.part, bytes = self.written, "backup part full");
            Self::close_part(builder)?;
        } else {
            self.builder = Some(builder);
        }
        Ok(())
    }

    /// Closes the open part and returns every part written.
    pub fn finish(mut self) -> CoreResult<Vec<PathBuf>> {
        if let Some(builder) = self.builder.take() {
            Self::close_part(builder)?;
        }
        Ok(self.parts)
    }
}

/// Reads every regular file in one part, handing its name and contents to
/// `on_file`. Returns the number of files read.
pub fn read_part(
    fs: &dyn FileSystem,
    path: &Path,
    mut on_file: impl FnMut(&str, Vec<u8>) -> CoreResult<()>,
) -> CoreResult<usize> {
    let reader = StorageReader::new(fs.open_file(path)?)?;
    let mut archive = tar::Archive::new(GzDecoder::new(reader));

    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = {
            let entry_path = entry.path()?;
            entry_path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    CoreError::invalid_operation(format!(
                        "backup entry {} has no file name",
                        entry_path.display()
                    ))
                })?
        };

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        on_file(&name, data)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_storage::InMemoryFileSystem;

    fn files_in(fs: &dyn FileSystem, parts: &[PathBuf]) -> Vec<Vec<(String, Vec<u8>)>> {
        parts
            .iter()
            .map(|part| {
                let mut files = Vec::new();
                read_part(fs, part, |name, data| {
                    files.push((name.to_string(), data));
                    Ok(())
                })
                .unwrap();
                files
            })
            .collect()
    }

    #[test]
    fn single_part_holds_every_file() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
        let mut writer =
            PartWriter::create(Arc::clone(&fs), PathBuf::from("backup"), u64::MAX).unwrap();
        writer.add_file("0000000001", &[1; 1000]).unwrap();
        writer.add_file("_METADATA", &[2; 32]).unwrap();
        let parts = writer.finish().unwrap();

        assert_eq!(parts, vec![PathBuf::from("backup/backup-1.tar.gz")]);
        let files = files_in(fs.as_ref(), &parts);
        assert_eq!(
            files,
            vec![vec![
                ("0000000001".to_string(), vec![1; 1000]),
                ("_METADATA".to_string(), vec![2; 32]),
            ]]
        );
    }

    #[test]
    fn parts_roll_over_at_cap() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
        let mut writer = PartWriter::create(Arc::clone(&fs), PathBuf::from("backup"), 1).unwrap();
        for name in ["a", "b", "c"] {
            writer.add_file(name, name.as_bytes()).unwrap();
        }
        let parts = writer.finish().unwrap();

        assert_eq!(parts.len(), 3);
        let files = files_in(fs.as_ref(), &parts);
        assert_eq!(files[2], vec![("c".to_string(), b"c".to_vec())]);
    }

    #[test]
    fn create_replaces_previous_parts() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFileSystem::new());
        let mut first = PartWriter::create(Arc::clone(&fs), PathBuf::from("backup"), 1).unwrap();
        first.add_file("a", b"a").unwrap();
        first.add_file("b", b"b").unwrap();
        first.finish().unwrap();

        let mut second =
            PartWriter::create(Arc::clone(&fs), PathBuf::from("backup"), u64::MAX).unwrap();
        second.add_file("c", b"c").unwrap();
        second.finish().unwrap();

        let names: Vec<String> = fs
            .read_dir(Path::new("backup"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["backup-1.tar.gz"]);
    }
}
