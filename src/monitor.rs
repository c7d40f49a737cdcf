use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backup::BackupManager;
use crate::cancel::CancelFlag;

/// Elapsed-time limits for backup health. The original monitoring service
/// flagged anything past 8 hours; a day without any snapshot means the
/// backup loop is dead.
#[derive(Debug, Clone, Copy)]
pub struct StalenessThresholds {
    pub warn_after_hours: i64,
    pub inactive_after_hours: i64,
}

impl Default for StalenessThresholds {
    fn default() -> Self {
        StalenessThresholds {
            warn_after_hours: 8,
            inactive_after_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupHealth {
    Healthy,
    Warning,
    Inactive,
}

impl std::fmt::Display for BackupHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupHealth::Healthy => write!(f, "healthy"),
            BackupHealth::Warning => write!(f, "warning"),
            BackupHealth::Inactive => write!(f, "inactive"),
        }
    }
}

impl BackupHealth {
    pub fn exit_code(self) -> i32 {
        match self {
            BackupHealth::Healthy => 0,
            BackupHealth::Warning => 1,
            BackupHealth::Inactive => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupStatus {
    pub health: BackupHealth,
    pub snapshot_count: usize,
    pub latest_id: Option<String>,
    pub latest_created_at: Option<DateTime<Utc>>,
    pub age_hours: Option<f64>,
}

pub fn classify(
    latest: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    thresholds: StalenessThresholds,
) -> BackupHealth {
    let Some(created_at) = latest else {
        return BackupHealth::Inactive;
    };
    let elapsed = now.signed_duration_since(created_at);
    if elapsed >= chrono::Duration::hours(thresholds.inactive_after_hours) {
        BackupHealth::Inactive
    } else if elapsed >= chrono::Duration::hours(thresholds.warn_after_hours) {
        BackupHealth::Warning
    } else {
        BackupHealth::Healthy
    }
}

/// One read-and-classify pass over the manager's newest snapshot. Never
/// creates a snapshot; triggering backups belongs to the external scheduler.
pub fn check(
    manager: &BackupManager,
    thresholds: StalenessThresholds,
    now: DateTime<Utc>,
) -> anyhow::Result<BackupStatus> {
    let snapshots = manager.list_snapshots()?;
    let latest = snapshots.first();
    let age_hours = latest.map(|e| {
        now.signed_duration_since(e.created_at).num_milliseconds() as f64 / 3_600_000.0
    });
    Ok(BackupStatus {
        health: classify(latest.map(|e| e.created_at), now, thresholds),
        snapshot_count: snapshots.len(),
        latest_id: latest.map(|e| e.id.clone()),
        latest_created_at: latest.map(|e| e.created_at),
        age_hours,
    })
}

/// Fixed-interval monitoring loop; each tick is a single `check`. Stops when
/// the cancel flag is raised.
pub fn watch(
    manager: &BackupManager,
    thresholds: StalenessThresholds,
    interval: Duration,
    cancel: &CancelFlag,
    mut sink: impl FnMut(BackupStatus),
) -> anyhow::Result<()> {
    while !cancel.is_cancelled() {
        sink(check(manager, thresholds, Utc::now())?);
        let mut slept = Duration::ZERO;
        while slept < interval && !cancel.is_cancelled() {
            let step = Duration::from_millis(250).min(interval - slept);
            std::thread::sleep(step);
            slept += step;
        }
    }
    Ok(())
}
