//! Snapshot creation
//!
//! One call produces one snapshot file and its metadata sidecar in a single
//! destination directory:
//!
//! ```text
//! <destination>/<prefix>_<run_id>.db
//! <destination>/<prefix>_<run_id>.metadata.json
//! ```

use crate::database::{DatabaseEngine, DatabaseError};
use crate::integrity::{self, IntegrityError, IntegrityValidator};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Extension of plaintext snapshot files
pub const SNAPSHOT_EXTENSION: &str = "db";

/// Extension of metadata sidecars
pub const METADATA_EXTENSION: &str = "metadata.json";

/// Extension of encrypted sidecars
pub const ENCRYPTED_EXTENSION: &str = "encrypted";

/// Version written into every metadata sidecar
pub const BACKUP_FORMAT_VERSION: &str = "1.0";

/// Snapshot creation errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Source database unavailable at {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("Destination unavailable at {path}: {reason}")]
    DestinationUnavailable { path: PathBuf, reason: String },

    #[error("Snapshot already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Hot backup into {path} failed: {source}")]
    Engine {
        path: PathBuf,
        #[source]
        source: DatabaseError,
    },

    #[error("Failed to write metadata sidecar {path}: {reason}")]
    Metadata { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// Identifier of one backup run, `YYYYMMDD_HHMMSS` with an optional `_N`
/// suffix when the same second is reused within the process
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Hands out run ids that never repeat within the process
#[derive(Debug, Default)]
pub struct RunIdGenerator {
    last: Mutex<Option<(String, u32)>>,
}

impl RunIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for a run starting at `at`
    pub fn next(&self, at: DateTime<Utc>) -> RunId {
        let base = at.format("%Y%m%d_%H%M%S").to_string();
        let mut last = self.last.lock();

        let id = match last.as_mut() {
            Some((previous, counter)) if *previous == base => {
                *counter += 1;
                format!("{}_{}", base, counter)
            }
            _ => {
                *last = Some((base.clone(), 0));
                base
            }
        };
        RunId(id)
    }
}

/// File paths belonging to one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPaths {
    pub snapshot: PathBuf,
    pub metadata: PathBuf,
    pub encrypted: PathBuf,
}

impl SnapshotPaths {
    pub fn new(destination: &Path, prefix: &str, run_id: &RunId) -> Self {
        Self::from_stem(destination, &format!("{}_{}", prefix, run_id))
    }

    /// Derive sibling paths from any one of a snapshot's files
    pub fn from_file(path: &Path) -> Self {
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let stem = [METADATA_EXTENSION, SNAPSHOT_EXTENSION, ENCRYPTED_EXTENSION]
            .iter()
            .find_map(|ext| name.strip_suffix(&format!(".{}", ext)))
            .unwrap_or(&name)
            .to_string();

        Self::from_stem(dir, &stem)
    }

    fn from_stem(dir: &Path, stem: &str) -> Self {
        Self {
            snapshot: dir.join(format!("{}.{}", stem, SNAPSHOT_EXTENSION)),
            metadata: dir.join(format!("{}.{}", stem, METADATA_EXTENSION)),
            encrypted: dir.join(format!("{}.{}", stem, ENCRYPTED_EXTENSION)),
        }
    }
}

/// Contents of the `.metadata.json` sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub database_url: String,
    /// Snapshot file on disk: the `.encrypted` file once the plaintext is removed
    pub file_path: PathBuf,
    /// Size of `file_path`
    pub file_size: u64,
    pub rtm_entity_counts: BTreeMap<String, i64>,
    pub backup_version: String,
    pub gdpr_compliant: bool,
    pub unicode_safe: bool,
    /// SHA-256 of the plaintext snapshot, also for encrypted snapshots
    pub checksum: String,
}

impl SnapshotMetadata {
    pub async fn load(path: &Path) -> Result<Self, SnapshotError> {
        let raw = tokio::fs::read(path).await.map_err(|e| SnapshotError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_slice(&raw).map_err(|e| SnapshotError::Metadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write the sidecar, failing if `path` already exists unless `replace` is set
    pub async fn store(&self, path: &Path, replace: bool) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| SnapshotError::Metadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true);
        if replace {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let io_err = |e: std::io::Error| SnapshotError::Metadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        let mut file = options.open(path).await.map_err(io_err)?;
        file.write_all(&json).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        Ok(())
    }
}

/// Result of a successful snapshot
#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub paths: SnapshotPaths,
    pub file_size_bytes: u64,
    pub checksum_hex: String,
    pub metadata: SnapshotMetadata,
}

/// Produces consistent copies of the live database
pub struct SnapshotCreator {
    engine: Arc<dyn DatabaseEngine>,
    validator: Arc<IntegrityValidator>,
    prefix: String,
}

impl SnapshotCreator {
    pub fn new(
        engine: Arc<dyn DatabaseEngine>,
        validator: Arc<IntegrityValidator>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            validator,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Snapshot `source` into `destination` for `run_id`.
    ///
    /// Creates exactly one snapshot and one sidecar. On failure any partial
    /// output of this call is removed; existing files are never overwritten.
    pub async fn create(
        &self,
        source: &Path,
        destination: &Path,
        run_id: &RunId,
        gdpr_compliant: bool,
    ) -> Result<SnapshotOutcome, SnapshotError> {
        if !source.is_file() {
            return Err(SnapshotError::SourceUnavailable {
                path: source.to_path_buf(),
                reason: "not a readable file".to_string(),
            });
        }

        check_destination(destination).await?;

        let paths = SnapshotPaths::new(destination, &self.prefix, run_id);
        if paths.snapshot.exists() || paths.metadata.exists() {
            return Err(SnapshotError::AlreadyExists(paths.snapshot));
        }

        debug!(
            source = %source.display(),
            snapshot = %paths.snapshot.display(),
            "Starting hot backup"
        );

        if let Err(source_err) = self.engine.hot_backup(source, &paths.snapshot).await {
            remove_partial(&paths.snapshot).await;
            return Err(SnapshotError::Engine {
                path: paths.snapshot,
                source: source_err,
            });
        }

        match self.describe(source, &paths, run_id, gdpr_compliant).await {
            Ok(outcome) => {
                info!(
                    run_id = %run_id,
                    snapshot = %outcome.paths.snapshot.display(),
                    size_bytes = outcome.file_size_bytes,
                    checksum = %outcome.checksum_hex,
                    "Snapshot created"
                );
                Ok(outcome)
            }
            Err(e) => {
                remove_partial(&paths.snapshot).await;
                remove_partial(&paths.metadata).await;
                Err(e)
            }
        }
    }

    async fn describe(
        &self,
        source: &Path,
        paths: &SnapshotPaths,
        run_id: &RunId,
        gdpr_compliant: bool,
    ) -> Result<SnapshotOutcome, SnapshotError> {
        let file_size_bytes = tokio::fs::metadata(&paths.snapshot)
            .await
            .map_err(|e| SnapshotError::Io {
                path: paths.snapshot.clone(),
                source: e,
            })?
            .len();

        let checksum_hex = integrity::checksum_file(&paths.snapshot).await?;

        let rtm_entity_counts = match self.validator.entity_counts(&paths.snapshot).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(snapshot = %paths.snapshot.display(), error = %e, "Could not count entities");
                BTreeMap::new()
            }
        };

        let metadata = SnapshotMetadata {
            backup_id: run_id.to_string(),
            created_at: Utc::now(),
            database_url: self.engine.database_url(source),
            file_path: paths.snapshot.clone(),
            file_size: file_size_bytes,
            rtm_entity_counts,
            backup_version: BACKUP_FORMAT_VERSION.to_string(),
            gdpr_compliant,
            unicode_safe: true,
            checksum: checksum_hex.clone(),
        };
        metadata.store(&paths.metadata, false).await?;

        Ok(SnapshotOutcome {
            paths: paths.clone(),
            file_size_bytes,
            checksum_hex,
            metadata,
        })
    }
}

async fn check_destination(destination: &Path) -> Result<(), SnapshotError> {
    let unavailable = |reason: String| SnapshotError::DestinationUnavailable {
        path: destination.to_path_buf(),
        reason,
    };

    let meta = tokio::fs::metadata(destination)
        .await
        .map_err(|e| unavailable(e.to_string()))?;
    if !meta.is_dir() {
        return Err(unavailable("not a directory".to_string()));
    }
    if meta.permissions().readonly() {
        return Err(unavailable("directory is read-only".to_string()));
    }
    Ok(())
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial snapshot output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial output"),
    }
}
