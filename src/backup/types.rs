// Backup System Types - Run records, status views and the aggregate error

use super::retention::CleanupReport;
use crate::config::ConfigError;
use crate::crypto::EncryptionError;
use crate::integrity::IntegrityError;
use crate::snapshot::{RunId, SnapshotError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Outcome of one destination write within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub destination_path: PathBuf,
    pub success: bool,
    /// Plaintext snapshot path, which may be gone when `plaintext_retained` is false
    pub file_path: PathBuf,
    /// Plaintext snapshot size
    pub file_size_bytes: u64,
    pub checksum_hex: String,
    pub encrypted: bool,
    pub encrypted_path: Option<PathBuf>,
    /// False once the plaintext has been removed after encryption
    pub plaintext_retained: bool,
    pub validated: bool,
    pub error: Option<String>,
}

impl SnapshotRecord {
    pub(crate) fn failed(destination: PathBuf, file_path: PathBuf, error: String) -> Self {
        Self {
            destination_path: destination,
            success: false,
            file_path,
            file_size_bytes: 0,
            checksum_hex: String::new(),
            encrypted: false,
            encrypted_path: None,
            plaintext_retained: false,
            validated: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

/// One invocation of the engine across all destinations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRun {
    pub run_id: RunId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub snapshots: Vec<SnapshotRecord>,
    pub successful_destination_count: usize,
    pub total_destination_count: usize,
    pub integrity_validated: bool,
    pub gdpr_compliant: bool,
    /// Retention pass that followed the run; absent when the run failed
    pub retention: Option<CleanupReport>,
}

impl BackupRun {
    pub fn status(&self) -> RunStatus {
        if self.successful_destination_count >= 1 {
            RunStatus::Success
        } else {
            RunStatus::Failure
        }
    }

    /// Records of destinations that failed
    pub fn failures(&self) -> impl Iterator<Item = &SnapshotRecord> {
        self.snapshots.iter().filter(|s| !s.success)
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.snapshots
            .iter()
            .filter(|s| s.success)
            .map(|s| s.file_size_bytes)
            .sum()
    }
}

/// One invocation of restore-from-snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRun {
    pub source_backup_path: PathBuf,
    pub target_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub integrity_verified: bool,
    pub recovery_time_target_met: bool,
    pub restored_entity_counts: BTreeMap<String, i64>,
    /// Copy of the previous target, absent when there was no target
    pub safety_copy_path: Option<PathBuf>,
    pub decrypted: bool,
}

/// Per-destination view reported by `get_status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationStatus {
    pub path: PathBuf,
    pub exists: bool,
    pub writable: bool,
    pub snapshot_count: usize,
    pub latest_snapshot: Option<PathBuf>,
    /// Why the destination could not be listed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Most recent snapshot known for a destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastKnownBackup {
    pub destination: PathBuf,
    pub backup_id: String,
    pub snapshot_path: PathBuf,
    pub created_at: Option<DateTime<Utc>>,
    pub file_size: Option<u64>,
    pub checksum: Option<String>,
    pub encrypted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupStatus {
    pub destinations: Vec<DestinationStatus>,
    pub retention_days: u32,
    pub last_known_backups: Vec<LastKnownBackup>,
}

/// Restore step in which a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStage {
    ResolveSource,
    Decrypt,
    ValidateSource,
    SafetyCopy,
    Overwrite,
    ValidateTarget,
    VerifyCounts,
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreStage::ResolveSource => "source resolution",
            RestoreStage::Decrypt => "decryption",
            RestoreStage::ValidateSource => "source validation",
            RestoreStage::SafetyCopy => "pre-restore safety copy",
            RestoreStage::Overwrite => "target overwrite",
            RestoreStage::ValidateTarget => "target validation",
            RestoreStage::VerifyCounts => "entity count verification",
        };
        f.write_str(name)
    }
}

/// Aggregate, orchestration-level error
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("all destinations failed: 0 of {} succeeded", .run.total_destination_count)]
    AllDestinationsFailed { run: Box<BackupRun> },

    #[error("no backup destinations configured")]
    NoDestinations,

    #[error("a backup run is already in progress (lock {0})")]
    RunInProgress(PathBuf),

    #[error("restore failed during {stage}: {source}")]
    Restore {
        stage: RestoreStage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackupError {
    pub(crate) fn restore<E>(stage: RestoreStage, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BackupError::Restore {
            stage,
            source: Box::new(source),
        }
    }

    /// The failed run, when the error is a total destination failure
    pub fn failed_run(&self) -> Option<&BackupRun> {
        match self {
            BackupError::AllDestinationsFailed { run } => Some(run.as_ref()),
            _ => None,
        }
    }
}
