use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{Connection, DatabaseName};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EngineError;

pub const MANIFEST_FILE: &str = "backup_manifest.jsonl";
pub const AUTO_LABEL: &str = "auto";
pub const SAFETY_LABEL: &str = "pre_restore";

/// One line of the backup manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub sha256: String,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub max_count: Option<usize>,
    pub max_age_hours: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub dir: PathBuf,
    pub prefix: String,
    pub retention: RetentionPolicy,
}

/// Creates, lists, and retires snapshots. The only writer of the manifest
/// and the only component that ever deletes a snapshot file; the
/// reconciliation pipeline consumes snapshots strictly read-only.
pub struct BackupManager {
    config: BackupConfig,
}

impl BackupManager {
    pub fn new(config: BackupConfig) -> Self {
        BackupManager { config }
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.config.dir.join(MANIFEST_FILE)
    }

    /// Copies the live database into a new timestamped snapshot via the
    /// SQLite online backup API and appends a manifest entry. Any failure
    /// before the entry is appended surfaces as `CopyFailed` and leaves no
    /// manifest trace; a partial file is removed.
    pub fn create_snapshot(
        &self,
        live: &Connection,
        label: &str,
    ) -> Result<SnapshotEntry, EngineError> {
        fs::create_dir_all(&self.config.dir).map_err(|e| EngineError::CopyFailed {
            reason: format!(
                "cannot create backup directory {}: {}",
                self.config.dir.display(),
                e
            ),
        })?;

        let created_at = Utc::now();
        let id = format!(
            "{}_{}",
            self.config.prefix,
            created_at.format("%Y-%m-%dT%H-%M-%S-%3fZ")
        );
        let path = self.config.dir.join(format!("{}.db", id));

        let copied = live
            .backup(DatabaseName::Main, &path, None)
            .map_err(|e| EngineError::CopyFailed {
                reason: format!("sqlite backup to {} failed: {}", path.display(), e),
            })
            .and_then(|_| {
                let size = fs::metadata(&path)
                    .map_err(|e| EngineError::CopyFailed {
                        reason: format!("snapshot {} missing after copy: {}", path.display(), e),
                    })?
                    .len();
                let sha256 = file_sha256(&path).map_err(|e| EngineError::CopyFailed {
                    reason: format!("checksum of {} failed: {}", path.display(), e),
                })?;
                Ok((size, sha256))
            });

        let (size, sha256) = match copied {
            Ok(v) => v,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
        };

        let entry = SnapshotEntry {
            id,
            path,
            created_at,
            size,
            sha256,
            label: label.to_string(),
        };
        self.append_manifest(&entry)
            .map_err(|e| EngineError::CopyFailed {
                reason: format!("manifest append failed: {}", e),
            })?;
        info!(
            "snapshot {} created ({} bytes, label {})",
            entry.id, entry.size, entry.label
        );
        Ok(entry)
    }

    /// Snapshots newest first. The manifest is a cache: entries whose file
    /// vanished are dropped, and a lost manifest falls back to rescanning
    /// the snapshot directory.
    pub fn list_snapshots(&self) -> anyhow::Result<Vec<SnapshotEntry>> {
        let manifest = self.manifest_path();
        let mut entries = if manifest.is_file() {
            let file = File::open(&manifest)
                .with_context(|| format!("failed to open manifest {}", manifest.display()))?;
            let mut parsed = Vec::new();
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SnapshotEntry>(&line) {
                    Ok(entry) => parsed.push(entry),
                    Err(e) => warn!("manifest line {} unreadable, skipping: {}", line_no + 1, e),
                }
            }
            parsed
        } else {
            self.rescan()?
        };

        entries.retain(|e| e.path.is_file());
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(entries)
    }

    pub fn latest(&self) -> anyhow::Result<Option<SnapshotEntry>> {
        Ok(self.list_snapshots()?.into_iter().next())
    }

    /// Deletes snapshots beyond the retention policy. Always the last step
    /// of a backup cycle, never interleaved with creation. Returns what was
    /// deleted.
    pub fn apply_retention(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<SnapshotEntry>> {
        let entries = self.list_snapshots()?;
        let mut keep = Vec::new();
        let mut drop = Vec::new();
        for (idx, entry) in entries.into_iter().enumerate() {
            let beyond_count = self
                .config
                .retention
                .max_count
                .is_some_and(|max| idx >= max);
            let beyond_age = self.config.retention.max_age_hours.is_some_and(|max| {
                now.signed_duration_since(entry.created_at) >= chrono::Duration::hours(max)
            });
            if beyond_count || beyond_age {
                drop.push(entry);
            } else {
                keep.push(entry);
            }
        }

        for entry in &drop {
            match fs::remove_file(&entry.path) {
                Ok(()) => info!("retention removed snapshot {}", entry.id),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("failed to delete snapshot {}", entry.path.display())
                    })
                }
            }
        }

        // Manifest lines stay in creation order.
        keep.reverse();
        self.rewrite_manifest(&keep)?;
        Ok(drop)
    }

    /// Accepts either a snapshot id from the manifest or a direct file path,
    /// the way the incident scripts always took ad-hoc backup paths.
    pub fn resolve(&self, reference: &str) -> anyhow::Result<(String, PathBuf)> {
        if let Some(entry) = self
            .list_snapshots()?
            .into_iter()
            .find(|e| e.id == reference)
        {
            return Ok((entry.id, entry.path));
        }
        let path = PathBuf::from(reference);
        if path.is_file() {
            let id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| reference.to_string());
            return Ok((id, path));
        }
        anyhow::bail!("unknown snapshot: {}", reference)
    }

    fn append_manifest(&self, entry: &SnapshotEntry) -> anyhow::Result<()> {
        let manifest = self.manifest_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&manifest)
            .with_context(|| format!("failed to open manifest {}", manifest.display()))?;
        writeln!(file, "{}", serde_json::to_string(entry)?)?;
        Ok(())
    }

    fn rewrite_manifest(&self, entries: &[SnapshotEntry]) -> anyhow::Result<()> {
        let manifest = self.manifest_path();
        let mut out = String::new();
        for entry in entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        fs::write(&manifest, out)
            .with_context(|| format!("failed to rewrite manifest {}", manifest.display()))?;
        Ok(())
    }

    fn rescan(&self) -> anyhow::Result<Vec<SnapshotEntry>> {
        if !self.config.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.config.dir)? {
            let dirent = dirent?;
            let path = dirent.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(&self.config.prefix) || !name.ends_with(".db") {
                continue;
            }
            let meta = dirent.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let created_at: DateTime<Utc> = meta.modified()?.into();
            entries.push(SnapshotEntry {
                id: name.trim_end_matches(".db").to_string(),
                path: path.clone(),
                created_at,
                size: meta.len(),
                sha256: file_sha256(&path)?,
                // Labels are manifest-only metadata; a rebuild cannot
                // recover them.
                label: AUTO_LABEL.to_string(),
            });
        }
        Ok(entries)
    }
}

fn file_sha256(path: &Path) -> anyhow::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
