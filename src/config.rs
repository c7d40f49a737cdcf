use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::backup::{BackupConfig, RetentionPolicy};
use crate::monitor::StalenessThresholds;

pub const CONFIG_FILE: &str = "backup_config.json";

/// `backup_config.json`, the same file the original backup service kept next
/// to the live database. Every field has a default, so a missing file or a
/// partial one both work.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub live_path: PathBuf,
    pub backup_dir: PathBuf,
    pub backup_prefix: String,
    pub max_backups_to_keep: Option<usize>,
    pub max_backup_age_hours: Option<i64>,
    pub warn_after_hours: i64,
    pub inactive_after_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            live_path: PathBuf::from("classroom.db"),
            backup_dir: PathBuf::from("automated_backups"),
            backup_prefix: "auto_backup".to_string(),
            max_backups_to_keep: Some(7),
            max_backup_age_hours: None,
            warn_after_hours: 8,
            inactive_after_hours: 24,
        }
    }
}

impl EngineConfig {
    /// Explicit path must exist; otherwise `backup_config.json` in the
    /// working directory is used when present, and defaults when not.
    pub fn load(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(CONFIG_FILE);
                if !default.is_file() {
                    return Ok(EngineConfig::default());
                }
                default
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("config {} is not valid JSON", path.display()))
    }

    pub fn backup_config(&self) -> BackupConfig {
        BackupConfig {
            dir: self.backup_dir.clone(),
            prefix: self.backup_prefix.clone(),
            retention: RetentionPolicy {
                max_count: self.max_backups_to_keep,
                max_age_hours: self.max_backup_age_hours,
            },
        }
    }

    pub fn thresholds(&self) -> StalenessThresholds {
        StalenessThresholds {
            warn_after_hours: self.warn_after_hours,
            inactive_after_hours: self.inactive_after_hours,
        }
    }
}
