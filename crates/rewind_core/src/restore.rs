//! Restoring a database from a backup or directly from its rollback logs.
//!
//! Both paths end by fixing the target at the restore point's exact page
//! count and logging a fresh restore point on the target.

use crate::backup::{read_part, Backup};
use crate::config::Config;
use crate::dir::{parse_bucket_name, DatabasePaths, METADATA_FILE};
use crate::error::{CoreError, CoreResult};
use crate::store::{range_index, Checkpointer, PageLogger, PageStore};
use crate::types::{hour_bucket, narrow, now_nanos, DatabaseKey, RestorePoint};
use rewind_storage::FileSystem;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Receives the finalize step of [`restore_from_timestamp`].
///
/// The callback decides when the restored pages become visible by calling
/// the finalize closure, possibly inside its own transaction.
pub type OnComplete<'a> = dyn FnMut(&mut dyn FnMut() -> CoreResult<()>) -> CoreResult<()> + 'a;

/// Restores `target` from the backup of `source_key` at `timestamp`.
///
/// Every part is read through once before the target's existing pages and
/// logs are deleted, so a damaged backup leaves the target untouched.
///
/// # Errors
///
/// Returns `RestoreBackupNotFound` if the backup directory, its parts or
/// its files are missing, and the archive error if a part cannot be read.
pub fn restore_from_backup(
    fs: &Arc<dyn FileSystem>,
    source_key: &DatabaseKey,
    timestamp: i64,
    target: &PageStore,
) -> CoreResult<RestorePoint> {
    let backup = Backup::new(Arc::clone(fs), source_key.clone(), timestamp, target.config());
    let parts = backup.parts()?;
    if parts.is_empty() {
        return Err(CoreError::RestoreBackupNotFound { timestamp });
    }

    let mut files = 0;
    for part in &parts {
        files += read_part(fs.as_ref(), part, |_, _| Ok(()))?;
    }
    if files == 0 {
        return Err(CoreError::RestoreBackupNotFound { timestamp });
    }

    info!(
        source = %source_key,
        target = %target.key(),
        timestamp,
        parts = parts.len(),
        files,
        "restoring from backup"
    );
    target.clear_data()?;

    let ranges_dir = target.database_paths().ranges_dir();
    fs.create_dir_all(&ranges_dir)?;

    for part in &parts {
        read_part(fs.as_ref(), part, |name, data| {
            fs.write_file(&ranges_dir.join(name), &data)?;
            if name == METADATA_FILE {
                target.reload()?;
            }
            Ok(())
        })?;
        debug!(part = %part.display(), "unpacked backup part");
    }

    target.reload()?;
    let page_count = target.page_count();
    target.finalize_restore(page_count)
}

/// Copies the pages of `source` up to the range holding `max_page_number`
/// into `target`, then compacts the target.
///
/// Range files are copied under the source's compaction barrier and page
/// logs under its checkpoint barrier, nested inside, so the copy is a
/// consistent cut of the source.
pub fn copy_source_database_to_target_database<S>(
    max_page_number: u64,
    source: &S,
    target: &PageStore,
) -> CoreResult<()>
where
    S: Checkpointer + PageLogger,
{
    let fs = source.file_system();
    let from = source.database_paths();
    let to = target.database_paths();
    let last = range_index(max_page_number, target.config().range_size);

    source.compaction_barrier(&mut || {
        copy_range_files(fs.as_ref(), from, to, last)?;
        source.checkpoint_barrier(&mut || copy_page_logs(fs.as_ref(), from, to))
    })?;

    target.reload()?;
    target.compact()?;
    debug!(target = %target.key(), last_range = last, "copied source database");
    Ok(())
}

fn copy_range_files(
    fs: &dyn FileSystem,
    from: &DatabasePaths,
    to: &DatabasePaths,
    last: u64,
) -> CoreResult<()> {
    fs.create_dir_all(&to.ranges_dir())?;
    for index in 1..=last {
        match fs.read_file(&from.range_file(index)) {
            Ok(data) => fs.write_file(&to.range_file(index), &data)?,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        }
    }

    match fs.read_file(&from.metadata_file()) {
        Ok(data) => fs.write_file(&to.metadata_file(), &data)?,
        Err(e) if !e.is_not_found() => return Err(e.into()),
        Err(_) => {}
    }
    Ok(())
}

fn copy_page_logs(fs: &dyn FileSystem, from: &DatabasePaths, to: &DatabasePaths) -> CoreResult<()> {
    let entries = match fs.read_dir(&from.page_log_dir()) {
        Ok(entries) => entries,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    fs.create_dir_all(&to.page_log_dir())?;
    for entry in entries.iter().filter(|entry| !entry.is_dir) {
        let data = fs.read_file(&from.page_log_dir().join(&entry.name))?;
        fs.write_file(&to.page_log_dir().join(&entry.name), &data)?;
    }
    Ok(())
}

/// Restores `target` to the state `source` had at restore point `timestamp`.
///
/// The source is copied, then every page changed after the restore point
/// is put back to its earliest logged prior image. When `on_complete` is
/// given it receives the finalize step instead of it running immediately.
///
/// # Errors
///
/// Returns `RestorePointNotFound` if the source has no restore point at
/// exactly `timestamp`, and `InvalidConfig` if the databases differ in page
/// or range size.
pub fn restore_from_timestamp(
    source: &PageStore,
    target: &PageStore,
    timestamp: i64,
    on_complete: Option<&mut OnComplete<'_>>,
) -> CoreResult<()> {
    let restore_point = source
        .get_restore_point(timestamp)?
        .ok_or(CoreError::RestorePointNotFound { timestamp })?;
    if source.key() == target.key() {
        return Err(CoreError::invalid_operation(
            "cannot restore a database onto itself",
        ));
    }
    if source.config().page_size != target.config().page_size {
        return Err(CoreError::invalid_config(
            "source and target page sizes differ",
        ));
    }
    // Range files are copied by index
    if source.config().range_size != target.config().range_size {
        return Err(CoreError::invalid_config(
            "source and target range sizes differ",
        ));
    }

    info!(
        source = %source.key(),
        target = %target.key(),
        timestamp,
        page_count = restore_point.page_count,
        "restoring from timestamp"
    );
    target.clear_data()?;
    copy_source_database_to_target_database(restore_point.page_count, source, target)?;

    // Logs are listed after the copy so that they cover every change it holds
    let logs = source
        .rollback_logger()
        .logs_between(hour_bucket(timestamp), now_nanos()?)?;

    let page_size: usize = narrow(target.config().page_size, "page_size")?;
    let mut touched = HashSet::new();
    for log in &logs {
        for batch in log.read_for_timestamp(restore_point.timestamp + 1)? {
            let mut images = BTreeMap::new();
            for entry in batch? {
                let page = entry.page_number;
                if page > restore_point.page_count || !touched.insert(page) {
                    continue;
                }
                if entry.data.len() != page_size {
                    return Err(CoreError::rollback_corruption(format!(
                        "image of page {page} is {} bytes, expected {page_size}",
                        entry.data.len()
                    )));
                }
                images.insert(page, entry.data);
            }
            target.range_files().write_pages(&images)?;
        }
    }
    debug!(logs = logs.len(), pages = touched.len(), "replayed rollback logs");

    let mut finalize = || target.finalize_restore(restore_point.page_count).map(|_| ());
    match on_complete {
        Some(callback) => callback(&mut finalize),
        None => finalize(),
    }
}

/// Returns the earliest backup of `key` taken at or after `timestamp`.
pub fn next_backup(
    fs: &Arc<dyn FileSystem>,
    key: &DatabaseKey,
    config: &Config,
    timestamp: i64,
) -> CoreResult<Option<Backup>> {
    Ok(list_backups(fs, key, config)?
        .into_iter()
        .find(|backup| backup.timestamp() >= timestamp))
}

/// Returns every backup of `key`, oldest first.
///
/// # Errors
///
/// Returns `InvalidBucketName` if the backup directory holds an entry whose
/// name is not a timestamp.
pub fn list_backups(
    fs: &Arc<dyn FileSystem>,
    key: &DatabaseKey,
    config: &Config,
) -> CoreResult<Vec<Backup>> {
    let dir = DatabasePaths::new(key).backups_dir();
    let entries = match fs.read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.is_not_found() => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut timestamps = entries
        .iter()
        .filter(|entry| entry.is_dir)
        .map(|entry| parse_bucket_name(&dir, &entry.name))
        .collect::<CoreResult<Vec<i64>>>()?;
    timestamps.sort_unstable();

    Ok(timestamps
        .into_iter()
        .map(|timestamp| Backup::new(Arc::clone(fs), key.clone(), timestamp, config))
        .collect())
}
