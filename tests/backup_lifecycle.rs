use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Duration, Utc};
use rusqlite::Connection;

use classroom_restore::backup::{
    BackupConfig, BackupManager, RetentionPolicy, AUTO_LABEL, MANIFEST_FILE,
};
use classroom_restore::error::EngineError;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn seed_live(dir: &Path) -> Connection {
    let conn = Connection::open(dir.join("classroom.db")).expect("open live db");
    conn.execute_batch(
        "CREATE TABLE lessons(id INTEGER PRIMARY KEY, subject TEXT);
         INSERT INTO lessons(id, subject) VALUES (1, 'math'), (2, 'science');",
    )
    .expect("seed live db");
    conn
}

fn manager(dir: &Path, max_count: Option<usize>, max_age_hours: Option<i64>) -> BackupManager {
    BackupManager::new(BackupConfig {
        dir: dir.join("automated_backups"),
        prefix: "auto_backup".to_string(),
        retention: RetentionPolicy {
            max_count,
            max_age_hours,
        },
    })
}

#[test]
fn create_snapshot_records_a_manifest_entry() {
    let dir = temp_dir("classroom-backup-create");
    let live = seed_live(&dir);
    let manager = manager(&dir, Some(7), None);

    let entry = manager.create_snapshot(&live, AUTO_LABEL).expect("create snapshot");
    assert!(entry.path.is_file());
    assert!(entry.size > 0);
    assert_eq!(entry.label, AUTO_LABEL);
    assert!(entry.id.starts_with("auto_backup_"));
    assert_eq!(entry.sha256.len(), 64);

    // The copy is a valid database with the same rows.
    let copy = Connection::open(&entry.path).expect("open snapshot copy");
    let count: i64 = copy
        .query_row("SELECT COUNT(*) FROM lessons", [], |r| r.get(0))
        .expect("count rows in copy");
    assert_eq!(count, 2);

    let manifest = std::fs::read_to_string(dir.join("automated_backups").join(MANIFEST_FILE))
        .expect("read manifest");
    assert!(manifest.contains(&entry.id));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn snapshots_list_newest_first() {
    let dir = temp_dir("classroom-backup-list");
    let live = seed_live(&dir);
    let manager = manager(&dir, Some(7), None);

    let first = manager.create_snapshot(&live, AUTO_LABEL).expect("first snapshot");
    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = manager.create_snapshot(&live, AUTO_LABEL).expect("second snapshot");

    let listed = manager.list_snapshots().expect("list");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);
    assert_eq!(listed[1].id, first.id);

    let latest = manager.latest().expect("latest").expect("some snapshot");
    assert_eq!(latest.id, second.id);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn retention_by_count_keeps_the_newest() {
    let dir = temp_dir("classroom-backup-retain-count");
    let live = seed_live(&dir);
    let manager = manager(&dir, Some(1), None);

    let old = manager.create_snapshot(&live, AUTO_LABEL).expect("old snapshot");
    std::thread::sleep(std::time::Duration::from_millis(5));
    let new = manager.create_snapshot(&live, AUTO_LABEL).expect("new snapshot");

    let removed = manager.apply_retention(Utc::now()).expect("retention");
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].id, old.id);
    assert!(!old.path.is_file());
    assert!(new.path.is_file());

    let listed = manager.list_snapshots().expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, new.id);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn retention_by_age_drops_expired_snapshots() {
    let dir = temp_dir("classroom-backup-retain-age");
    let live = seed_live(&dir);
    let manager = manager(&dir, None, Some(24));

    let entry = manager.create_snapshot(&live, AUTO_LABEL).expect("snapshot");

    // Nothing is old enough yet.
    let removed = manager.apply_retention(Utc::now()).expect("retention now");
    assert!(removed.is_empty());
    assert!(entry.path.is_file());

    // Two days later the same snapshot is past the 24h limit.
    let removed = manager
        .apply_retention(Utc::now() + Duration::hours(48))
        .expect("retention later");
    assert_eq!(removed.len(), 1);
    assert!(!entry.path.is_file());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn lost_manifest_is_rebuilt_from_the_directory() {
    let dir = temp_dir("classroom-backup-rebuild");
    let live = seed_live(&dir);
    let manager = manager(&dir, Some(7), None);

    let entry = manager.create_snapshot(&live, AUTO_LABEL).expect("snapshot");
    std::fs::remove_file(dir.join("automated_backups").join(MANIFEST_FILE))
        .expect("drop manifest");

    // The manifest is a cache: listing falls back to scanning the snapshot
    // directory itself.
    let listed = manager.list_snapshots().expect("list after manifest loss");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, entry.id);
    assert_eq!(listed[0].sha256, entry.sha256);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn resolve_accepts_manifest_ids_and_paths() {
    let dir = temp_dir("classroom-backup-resolve");
    let live = seed_live(&dir);
    let manager = manager(&dir, Some(7), None);

    let entry = manager.create_snapshot(&live, AUTO_LABEL).expect("snapshot");

    let (by_id, path) = manager.resolve(&entry.id).expect("resolve by id");
    assert_eq!(by_id, entry.id);
    assert_eq!(path, entry.path);

    let raw = entry.path.to_string_lossy().into_owned();
    let (by_path, path) = manager.resolve(&raw).expect("resolve by path");
    assert_eq!(by_path, entry.id);
    assert_eq!(path, entry.path);

    assert!(manager.resolve("auto_backup_never_created").is_err());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn blocked_backup_directory_is_copy_failed() {
    let dir = temp_dir("classroom-backup-blocked");
    let live = seed_live(&dir);

    let blocked = dir.join("blocked");
    std::fs::write(&blocked, b"file in the way").expect("block dir path");
    let manager = BackupManager::new(BackupConfig {
        dir: blocked,
        prefix: "auto_backup".to_string(),
        retention: RetentionPolicy {
            max_count: None,
            max_age_hours: None,
        },
    });

    let err = manager.create_snapshot(&live, AUTO_LABEL).expect_err("must fail");
    assert!(matches!(err, EngineError::CopyFailed { .. }));

    let _ = std::fs::remove_dir_all(dir);
}
