use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Duration, Utc};
use rusqlite::Connection;

use classroom_restore::backup::{BackupConfig, BackupManager, RetentionPolicy, AUTO_LABEL};
use classroom_restore::cancel::CancelFlag;
use classroom_restore::monitor::{check, classify, watch, BackupHealth, StalenessThresholds};

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

fn manager(dir: &Path) -> BackupManager {
    BackupManager::new(BackupConfig {
        dir: dir.join("automated_backups"),
        prefix: "auto_backup".to_string(),
        retention: RetentionPolicy {
            max_count: Some(7),
            max_age_hours: None,
        },
    })
}

#[test]
fn classification_follows_elapsed_time() {
    let thresholds = StalenessThresholds::default();
    let now = Utc::now();

    assert_eq!(classify(None, now, thresholds), BackupHealth::Inactive);
    assert_eq!(
        classify(Some(now - Duration::minutes(30)), now, thresholds),
        BackupHealth::Healthy
    );
    assert_eq!(
        classify(Some(now - Duration::hours(9)), now, thresholds),
        BackupHealth::Warning
    );
    // Boundary: exactly the warning threshold is already a warning.
    assert_eq!(
        classify(Some(now - Duration::hours(8)), now, thresholds),
        BackupHealth::Warning
    );
    assert_eq!(
        classify(Some(now - Duration::hours(24)), now, thresholds),
        BackupHealth::Inactive
    );
    assert_eq!(
        classify(Some(now - Duration::days(3)), now, thresholds),
        BackupHealth::Inactive
    );
}

#[test]
fn health_exit_codes_match_the_command_contract() {
    assert_eq!(BackupHealth::Healthy.exit_code(), 0);
    assert_eq!(BackupHealth::Warning.exit_code(), 1);
    assert_eq!(BackupHealth::Inactive.exit_code(), 2);
}

#[test]
fn no_snapshots_ever_created_reports_inactive() {
    let dir = temp_dir("classroom-status-empty");
    let manager = manager(&dir);

    let status = check(&manager, StalenessThresholds::default(), Utc::now()).expect("check");
    assert_eq!(status.health, BackupHealth::Inactive);
    assert_eq!(status.snapshot_count, 0);
    assert!(status.latest_id.is_none());
    assert!(status.age_hours.is_none());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn fresh_snapshot_reports_healthy() {
    let dir = temp_dir("classroom-status-fresh");
    let live = Connection::open(dir.join("classroom.db")).expect("open live db");
    live.execute_batch("CREATE TABLE lessons(id INTEGER PRIMARY KEY)")
        .expect("create table");
    let manager = manager(&dir);
    let entry = manager.create_snapshot(&live, AUTO_LABEL).expect("snapshot");

    let status = check(&manager, StalenessThresholds::default(), Utc::now()).expect("check");
    assert_eq!(status.health, BackupHealth::Healthy);
    assert_eq!(status.snapshot_count, 1);
    assert_eq!(status.latest_id.as_deref(), Some(entry.id.as_str()));
    let age = status.age_hours.expect("age");
    assert!(age >= 0.0 && age < 1.0, "unexpected age: {age}");

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn watch_ticks_until_cancelled() {
    let dir = temp_dir("classroom-status-watch");
    let manager = manager(&dir);

    let cancel = CancelFlag::new();
    let stop = cancel.clone();
    let mut ticks = 0u32;
    watch(
        &manager,
        StalenessThresholds::default(),
        std::time::Duration::from_millis(10),
        &cancel,
        |status| {
            ticks += 1;
            assert_eq!(status.health, BackupHealth::Inactive);
            if ticks >= 2 {
                stop.cancel();
            }
        },
    )
    .expect("watch");
    assert!(ticks >= 2);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn stale_snapshot_reports_warning_through_check() {
    let dir = temp_dir("classroom-status-stale");
    let live = Connection::open(dir.join("classroom.db")).expect("open live db");
    live.execute_batch("CREATE TABLE lessons(id INTEGER PRIMARY KEY)")
        .expect("create table");
    let manager = manager(&dir);
    manager.create_snapshot(&live, AUTO_LABEL).expect("snapshot");

    // Move the clock instead of the snapshot: check is pure in `now`.
    let status = check(
        &manager,
        StalenessThresholds::default(),
        Utc::now() + Duration::hours(10),
    )
    .expect("check");
    assert_eq!(status.health, BackupHealth::Warning);

    let status = check(
        &manager,
        StalenessThresholds::default(),
        Utc::now() + Duration::hours(30),
    )
    .expect("check");
    assert_eq!(status.health, BackupHealth::Inactive);

    let _ = std::fs::remove_dir_all(dir);
}
