// Retention Manager - Age-based pruning of snapshots and their sidecars

use super::types::BackupError;
use crate::snapshot::{RunId, SnapshotPaths, ENCRYPTED_EXTENSION, SNAPSHOT_EXTENSION};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const SECS_PER_DAY: u64 = 24 * 3600;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// A snapshot older than the retention cutoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionCandidate {
    pub destination: PathBuf,
    pub run_id: RunId,
    /// The `.db` file, or the `.encrypted` file when no plaintext is kept
    pub snapshot_path: PathBuf,
    /// Sidecars found next to the snapshot
    pub sidecars: Vec<PathBuf>,
    pub age_days: f64,
    /// Combined size of the snapshot and its sidecars
    pub size_mb: f64,
    pub deleted: bool,
}

impl RetentionCandidate {
    /// Every file removed when this candidate is deleted
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.snapshot_path.as_path()).chain(self.sidecars.iter().map(PathBuf::as_path))
    }
}

/// Result of one retention pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub retention_days: u32,
    pub dry_run: bool,
    pub cutoff: DateTime<Utc>,
    pub total_files_identified: usize,
    pub total_files_deleted: usize,
    pub total_size_mb: f64,
    pub candidates: Vec<RetentionCandidate>,
    pub errors: Vec<String>,
}

/// A snapshot found in a destination directory
#[derive(Debug, Clone)]
pub struct DiscoveredSnapshot {
    pub run_id: RunId,
    pub paths: SnapshotPaths,
    pub has_plaintext: bool,
    pub has_encrypted: bool,
}

impl DiscoveredSnapshot {
    pub fn primary(&self) -> &Path {
        if self.has_plaintext {
            &self.paths.snapshot
        } else {
            &self.paths.encrypted
        }
    }
}

pub struct RetentionManager {
    prefix: String,
    pattern: Regex,
}

impl RetentionManager {
    pub fn new(prefix: &str) -> Result<Self, BackupError> {
        let pattern = Regex::new(&format!(
            r"^{}_(\d{{8}}_\d{{6}}(?:_\d+)?)\.({}|{})$",
            regex::escape(prefix),
            SNAPSHOT_EXTENSION,
            ENCRYPTED_EXTENSION
        ))
        .map_err(|e| {
            BackupError::Config(crate::config::ConfigError::Invalid(format!(
                "snapshot prefix '{}': {}",
                prefix, e
            )))
        })?;

        Ok(Self {
            prefix: prefix.to_string(),
            pattern,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Snapshots in `destination`, ordered by run id. A missing directory
    /// yields an empty list.
    pub async fn list_snapshots(&self, destination: &Path) -> Result<Vec<DiscoveredSnapshot>, BackupError> {
        let mut entries = match tokio::fs::read_dir(destination).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BackupError::Io {
                    path: destination.to_path_buf(),
                    source: e,
                })
            }
        };

        let mut found: BTreeMap<RunId, DiscoveredSnapshot> = BTreeMap::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| BackupError::Io {
            path: destination.to_path_buf(),
            source: e,
        })? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(caps) = self.pattern.captures(&name) else {
                continue;
            };
            let run_id = RunId::from(&caps[1]);
            let is_plaintext = &caps[2] == SNAPSHOT_EXTENSION;

            let snapshot = found.entry(run_id.clone()).or_insert_with(|| DiscoveredSnapshot {
                paths: SnapshotPaths::new(destination, &self.prefix, &run_id),
                run_id,
                has_plaintext: false,
                has_encrypted: false,
            });
            if is_plaintext {
                snapshot.has_plaintext = true;
            } else {
                snapshot.has_encrypted = true;
            }
        }

        Ok(found.into_values().collect())
    }

    /// Snapshots older than `cutoff` across `destinations`, in destination order
    pub async fn scan(
        &self,
        destinations: &[PathBuf],
        cutoff: SystemTime,
        exclude: Option<&RunId>,
    ) -> (Vec<RetentionCandidate>, Vec<String>) {
        let now = SystemTime::now();
        let mut candidates = Vec::new();
        let mut errors = Vec::new();

        for destination in destinations {
            let snapshots = match self.list_snapshots(destination).await {
                Ok(snapshots) => snapshots,
                Err(e) => {
                    warn!(destination = %destination.display(), error = %e, "Skipping destination during retention scan");
                    errors.push(e.to_string());
                    continue;
                }
            };

            for snapshot in snapshots {
                if exclude == Some(&snapshot.run_id) {
                    continue;
                }

                let primary = snapshot.primary().to_path_buf();
                let modified = match tokio::fs::metadata(&primary).await.and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(e) => {
                        errors.push(format!("{}: {}", primary.display(), e));
                        continue;
                    }
                };
                if modified >= cutoff {
                    continue;
                }

                let mut sidecars = Vec::new();
                let mut size_bytes = file_size(&primary).await;
                let mut optional = vec![snapshot.paths.metadata.clone()];
                if snapshot.has_plaintext && snapshot.has_encrypted {
                    optional.push(snapshot.paths.encrypted.clone());
                }
                for sidecar in optional {
                    if tokio::fs::try_exists(&sidecar).await.unwrap_or(false) {
                        size_bytes += file_size(&sidecar).await;
                        sidecars.push(sidecar);
                    }
                }

                let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
                candidates.push(RetentionCandidate {
                    destination: destination.clone(),
                    run_id: snapshot.run_id,
                    snapshot_path: primary,
                    sidecars,
                    age_days: age.as_secs_f64() / SECS_PER_DAY as f64,
                    size_mb: size_bytes as f64 / BYTES_PER_MB,
                    deleted: false,
                });
            }
        }

        (candidates, errors)
    }

    /// Remove snapshots older than `days` from every destination.
    ///
    /// With `dry_run` nothing is deleted and the report lists what would be.
    /// `exclude` protects one run's files, used to keep the run that just
    /// finished out of its own retention pass.
    pub async fn cleanup(
        &self,
        destinations: &[PathBuf],
        days: u32,
        dry_run: bool,
        exclude: Option<&RunId>,
    ) -> CleanupReport {
        let window = Duration::from_secs(u64::from(days) * SECS_PER_DAY);
        let cutoff = SystemTime::now()
            .checked_sub(window)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let (mut candidates, mut errors) = self.scan(destinations, cutoff, exclude).await;

        let mut deleted = 0;
        if !dry_run {
            for candidate in candidates.iter_mut() {
                let mut ok = true;
                for file in candidate.files() {
                    match tokio::fs::remove_file(file).await {
                        Ok(()) => debug!(file = %file.display(), "Deleted expired backup file"),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            ok = false;
                            errors.push(format!("{}: {}", file.display(), e));
                        }
                    }
                }
                candidate.deleted = ok;
                if ok {
                    deleted += 1;
                }
            }
        }

        let total_size_mb = candidates.iter().map(|c| c.size_mb).sum();
        info!(
            retention_days = days,
            dry_run,
            identified = candidates.len(),
            deleted,
            total_size_mb,
            "Retention pass complete"
        );

        CleanupReport {
            retention_days: days,
            dry_run,
            cutoff: DateTime::<Utc>::from(cutoff),
            total_files_identified: candidates.len(),
            total_files_deleted: deleted,
            total_size_mb,
            candidates,
            errors,
        }
    }
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}
