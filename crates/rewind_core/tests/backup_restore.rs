//! End-to-end backup and restore tests against the local file system.

use rewind_core::types::{hour_bucket, now_nanos, NANOS_PER_HOUR};
use rewind_core::{
    list_backups, next_backup, restore_from_backup, restore_from_timestamp, Backup, BackupLocks,
    Config, CoreError, CoreResult, DatabaseKey, PageLogger, PageStore, RestorePoint,
};
use rewind_storage::{FileSystem, LocalFileSystem};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

const PAGE: usize = 512;

struct Fixture {
    _dir: TempDir,
    fs: Arc<dyn FileSystem>,
    config: Config,
}

impl Fixture {
    fn new(config: Config) -> Self {
        let dir = tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new(dir.path()));
        Self {
            _dir: dir,
            fs,
            config,
        }
    }

    fn open(&self, branch: &str) -> PageStore {
        PageStore::open(
            Arc::clone(&self.fs),
            DatabaseKey::new("orders", branch),
            self.config.clone(),
        )
        .unwrap()
    }
}

fn config() -> Config {
    Config::default().page_size(PAGE as u64).range_size(4)
}

/// Page contents of a database, keyed by page number.
type Model = BTreeMap<u64, Vec<u8>>;

fn write(store: &PageStore, model: &mut Model, list: &[(u64, u8)]) -> RestorePoint {
    let pages: BTreeMap<u64, Vec<u8>> = list.iter().map(|&(p, fill)| (p, vec![fill; PAGE])).collect();
    model.extend(pages.clone());
    store.checkpoint(&pages).unwrap()
}

fn assert_matches(store: &PageStore, model: &Model, page_count: u64) {
    assert_eq!(store.page_count(), page_count);
    for page in 1..=page_count {
        let expected = model.get(&page).cloned().unwrap_or_else(|| vec![0; PAGE]);
        assert_eq!(
            store.read_page(page).unwrap(),
            Some(expected),
            "page {page} differs"
        );
    }
    assert_eq!(store.read_page(page_count + 1).unwrap(), None);
    assert_eq!(
        store.range_files().total_size().unwrap(),
        page_count * PAGE as u64
    );
}

#[test]
fn backup_and_restore_roundtrip() {
    let fixture = Fixture::new(config());
    let source = fixture.open("main");
    let locks = BackupLocks::new();

    let mut model = Model::new();
    let first = write(&source, &mut model, &[(1, 1), (2, 2), (3, 3), (4, 4), (5, 5), (6, 6)]);
    let at_first = model.clone();
    write(&source, &mut model, &[(2, 0xAA), (9, 9)]);

    let backup = Backup::for_store(&source, first.timestamp);
    assert_eq!(backup.run(&locks, &source).unwrap(), first);
    assert!(backup.exists().unwrap());
    assert_eq!(backup.parts().unwrap().len(), 1);

    let target = fixture.open("restored");
    let restored = restore_from_backup(&fixture.fs, source.key(), first.timestamp, &target).unwrap();
    assert_eq!(restored.page_count, 6);
    assert_matches(&target, &at_first, 6);

    // The source is untouched
    assert_eq!(source.page_count(), 9);
    assert_eq!(source.read_page(2).unwrap(), Some(vec![0xAA; PAGE]));
}

#[test]
fn multi_part_backup() {
    let fixture = Fixture::new(config().max_part_size(1));
    let source = fixture.open("main");
    let locks = BackupLocks::new();

    let mut model = Model::new();
    let first = write(&source, &mut model, &[(1, 1), (2, 2), (3, 3), (4, 4), (5, 5), (6, 6)]);
    let at_first = model.clone();
    write(&source, &mut model, &[(1, 0x10), (5, 0x50), (7, 7)]);

    let backup = Backup::for_store(&source, first.timestamp);
    backup.run(&locks, &source).unwrap();

    // Two range files and the metadata, one per part
    let info = backup.to_info().unwrap();
    assert_eq!(info.parts, 3);
    assert_eq!(info.restore_point, first.timestamp);
    assert_eq!(info.size, backup.size().unwrap());

    let target = fixture.open("restored");
    restore_from_backup(&fixture.fs, source.key(), first.timestamp, &target).unwrap();
    assert_matches(&target, &at_first, 6);
}

#[test]
fn rolling_backups() {
    let fixture = Fixture::new(config());
    let source = fixture.open("main");
    let locks = BackupLocks::new();

    let mut model = Model::new();
    let mut taken = Vec::new();
    for i in 0..4u8 {
        let point = write(&source, &mut model, &[(1, i + 1), (u64::from(i + 1) * 3, 100 + i)]);
        Backup::for_store(&source, point.timestamp)
            .run(&locks, &source)
            .unwrap();
        taken.push((point, model.clone()));
    }

    let backups = list_backups(&fixture.fs, source.key(), &fixture.config).unwrap();
    let timestamps: Vec<i64> = backups.iter().map(Backup::timestamp).collect();
    let expected: Vec<i64> = taken.iter().map(|(point, _)| point.timestamp).collect();
    assert_eq!(timestamps, expected);

    let second = next_backup(&fixture.fs, source.key(), &fixture.config, expected[0] + 1)
        .unwrap()
        .unwrap();
    assert_eq!(second.timestamp(), expected[1]);
    assert!(
        next_backup(&fixture.fs, source.key(), &fixture.config, expected[3] + 1)
            .unwrap()
            .is_none()
    );

    for (i, (point, pages)) in taken.iter().enumerate() {
        let target = fixture.open(&format!("restore-{i}"));
        restore_from_backup(&fixture.fs, source.key(), point.timestamp, &target).unwrap();
        assert_matches(&target, pages, point.page_count);
    }
}

#[test]
fn backup_truncates_range_to_restore_point() {
    let fixture = Fixture::new(config());
    let source = fixture.open("main");

    let mut model = Model::new();
    let first = write(&source, &mut model, &[(1, 1), (5, 5)]);
    write(&source, &mut model, &[(5, 0x55), (6, 6), (8, 8)]);
    source.compact().unwrap();

    let backup = Backup::for_store(&source, first.timestamp);
    let range = backup.read_backup_range_file(&source, first, 2).unwrap();
    assert_eq!(range, vec![5; PAGE]);

    let range = backup.read_backup_range_file(&source, first, 1).unwrap();
    assert_eq!(range.len(), 4 * PAGE);
    assert_eq!(&range[..PAGE], &[1; PAGE][..]);
    assert!(range[PAGE..].iter().all(|&b| b == 0));
}

#[test]
fn restore_point_fidelity_for_sparse_pages() {
    let fixture = Fixture::new(config());
    let source = fixture.open("main");

    let mut model = Model::new();
    let first = write(&source, &mut model, &[(10, 10)]);
    let at_first = model.clone();
    write(&source, &mut model, &[(3, 3), (10, 0xA0), (20, 20)]);

    let target = fixture.open("restored");
    restore_from_timestamp(&source, &target, first.timestamp, None).unwrap();
    assert_matches(&target, &at_first, 10);
    assert_eq!(target.latest_restore_point().unwrap().unwrap().page_count, 10);
}

#[test]
fn restore_from_timestamp_hands_finalize_to_callback() {
    let fixture = Fixture::new(config());
    let source = fixture.open("main");

    let mut model = Model::new();
    let first = write(&source, &mut model, &[(1, 1), (2, 2), (3, 3)]);
    let at_first = model.clone();
    write(&source, &mut model, &[(1, 0x11), (4, 4), (5, 5)]);
    source.compact().unwrap();
    write(&source, &mut model, &[(2, 0x22)]);

    let target = fixture.open("restored");
    let mut calls = 0;
    let mut on_complete = |finalize: &mut dyn FnMut() -> CoreResult<()>| {
        calls += 1;
        finalize()
    };
    restore_from_timestamp(&source, &target, first.timestamp, Some(&mut on_complete)).unwrap();
    assert_eq!(calls, 1);
    assert_matches(&target, &at_first, 3);
}

#[test]
fn restore_waits_for_callback_to_finalize() {
    let fixture = Fixture::new(config());
    let source = fixture.open("main");

    let mut model = Model::new();
    let first = write(&source, &mut model, &[(1, 1)]);
    write(&source, &mut model, &[(2, 2)]);

    let target = fixture.open("restored");
    let mut skip =
        |_: &mut dyn FnMut() -> CoreResult<()>| -> CoreResult<()> { Ok(()) };
    restore_from_timestamp(&source, &target, first.timestamp, Some(&mut skip)).unwrap();

    assert_eq!(target.latest_restore_point().unwrap(), None);
}

#[test]
fn restore_rejects_unknown_restore_point() {
    let fixture = Fixture::new(config());
    let source = fixture.open("main");
    let point = write(&source, &mut Model::new(), &[(1, 1)]);
    let target = fixture.open("restored");

    let err = restore_from_timestamp(&source, &target, point.timestamp - 1, None).unwrap_err();
    assert!(matches!(err, CoreError::RestorePointNotFound { .. }));

    let err = restore_from_backup(&fixture.fs, source.key(), point.timestamp, &target).unwrap_err();
    assert!(matches!(err, CoreError::RestoreBackupNotFound { .. }));
}

#[test]
fn backup_requires_restore_point_and_lock() {
    let fixture = Fixture::new(config());
    let source = fixture.open("main");
    let locks = BackupLocks::new();
    let point = write(&source, &mut Model::new(), &[(1, 1)]);

    let err = Backup::for_store(&source, point.timestamp + 1)
        .run(&locks, &source)
        .unwrap_err();
    assert!(matches!(err, CoreError::BackupNoRestorePoint));

    let _held = locks.try_acquire(&source.key().hash()).unwrap();
    let err = Backup::for_store(&source, point.timestamp)
        .run(&locks, &source)
        .unwrap_err();
    assert!(matches!(err, CoreError::BackupAlreadyRunning { .. }));
}

#[test]
fn deleted_backup_is_gone() {
    let fixture = Fixture::new(config());
    let source = fixture.open("main");
    let locks = BackupLocks::new();
    let point = write(&source, &mut Model::new(), &[(1, 1)]);

    let backup = Backup::for_store(&source, point.timestamp);
    backup.run(&locks, &source).unwrap();
    backup.delete().unwrap();

    assert!(!backup.exists().unwrap());
    assert!(list_backups(&fixture.fs, source.key(), &fixture.config)
        .unwrap()
        .is_empty());
}

#[test]
fn earliest_hour_wins_across_logs() {
    let fixture = Fixture::new(config());
    let source = fixture.open("main");
    write(&source, &mut Model::new(), &[(1, 0xEE), (2, 0xEE)]);
    source.compact().unwrap();

    let point = RestorePoint::new(now_nanos().unwrap() - 3 * NANOS_PER_HOUR, 2);
    source
        .snapshot_logger()
        .log(point.timestamp, point.page_count)
        .unwrap();

    // The later hour is written first so file order cannot decide the winner
    let early = hour_bucket(point.timestamp) + NANOS_PER_HOUR + 10;
    let late = early + NANOS_PER_HOUR;
    let logger = source.rollback_logger();
    let frames: [(i64, &[(u64, u8)]); 2] = [
        (late, &[(1, 0x32), (2, 0x42)]),
        (early, &[(1, 0x31)]),
    ];
    for (ts, images) in frames {
        let (offset, mut size) = logger.start_frame(ts).unwrap();
        for &(page, fill) in images {
            size += logger.log(ts, page, vec![fill; PAGE]).unwrap();
        }
        logger.commit(ts, offset, size).unwrap();
    }

    let mut expected = vec![0x31; PAGE];
    expected.extend(vec![0x42; PAGE]);
    let backup = Backup::for_store(&source, point.timestamp);
    assert_eq!(
        backup.read_backup_range_file(&source, point, 1).unwrap(),
        expected
    );

    let target = fixture.open("restored");
    restore_from_timestamp(&source, &target, point.timestamp, None).unwrap();
    let model = Model::from([(1, vec![0x31; PAGE]), (2, vec![0x42; PAGE])]);
    assert_matches(&target, &model, 2);
}

#[test]
fn restore_rejects_mismatched_range_size() {
    let fixture = Fixture::new(config());
    let source = fixture.open("main");
    let point = write(&source, &mut Model::new(), &[(1, 1), (6, 6)]);
    let target = PageStore::open(
        Arc::clone(&fixture.fs),
        DatabaseKey::new("orders", "wide"),
        config().range_size(8),
    )
    .unwrap();

    let err = restore_from_timestamp(&source, &target, point.timestamp, None).unwrap_err();
    assert!(matches!(err, CoreError::InvalidConfig { .. }));
    assert!(target.restore_points().unwrap().is_empty());
}

#[test]
fn damaged_backup_leaves_target_intact() {
    let fixture = Fixture::new(config());
    let source = fixture.open("main");
    let locks = BackupLocks::new();
    let point = write(&source, &mut Model::new(), &[(1, 1), (2, 2)]);
    let backup = Backup::for_store(&source, point.timestamp);
    backup.run(&locks, &source).unwrap();

    let target = fixture.open("restored");
    write(&target, &mut Model::new(), &[(1, 0x77), (3, 0x33)]);

    let parts = backup.parts().unwrap();
    fixture.fs.write_file(&parts[0], b"not a gzip archive").unwrap();

    assert!(restore_from_backup(&fixture.fs, source.key(), point.timestamp, &target).is_err());
    assert_eq!(target.page_count(), 3);
    assert_eq!(target.read_page(1).unwrap(), Some(vec![0x77; PAGE]));
    assert_eq!(target.read_page(3).unwrap(), Some(vec![0x33; PAGE]));
}
