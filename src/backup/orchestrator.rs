// Backup Orchestrator - Multi-destination snapshot runs, status, cleanup and restore entry points

use super::lock::RunLock;
use super::restore::RestoreOrchestrator;
use super::retention::{CleanupReport, RetentionManager};
use super::types::{
    BackupError, BackupRun, BackupStatus, DestinationStatus, LastKnownBackup, RestoreRun,
    SnapshotRecord,
};
use super::BackupStatusProvider;
use crate::config::EngineConfig;
use crate::crypto::{self, SnapshotCipher};
use crate::database::{DatabaseEngine, SqliteEngine};
use crate::integrity::IntegrityValidator;
use crate::snapshot::{RunIdGenerator, SnapshotCreator, SnapshotMetadata, SnapshotPaths};
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

pub struct BackupOrchestrator {
    config: EngineConfig,
    engine: Arc<dyn DatabaseEngine>,
    validator: Arc<IntegrityValidator>,
    creator: SnapshotCreator,
    cipher: Option<SnapshotCipher>,
    retention: RetentionManager,
    restorer: RestoreOrchestrator,
    run_ids: RunIdGenerator,
    run_guard: tokio::sync::Mutex<()>,
}

impl BackupOrchestrator {
    /// Orchestrator over the SQLite engine
    pub fn new(config: EngineConfig) -> Result<Self, BackupError> {
        Self::with_engine(config, Arc::new(SqliteEngine::new()))
    }

    pub fn with_engine(config: EngineConfig, engine: Arc<dyn DatabaseEngine>) -> Result<Self, BackupError> {
        config.validate()?;

        let validator = Arc::new(IntegrityValidator::new(
            engine.clone(),
            config.essential_tables.clone(),
        ));
        let cipher = match &config.encryption.passphrase {
            Some(passphrase) => Some(SnapshotCipher::from_passphrase(
                passphrase,
                config.encryption.salt.as_bytes(),
                config.encryption.iterations,
            )?),
            None => None,
        };

        Ok(Self {
            creator: SnapshotCreator::new(engine.clone(), validator.clone(), config.snapshot_prefix.clone()),
            retention: RetentionManager::new(&config.snapshot_prefix)?,
            restorer: RestoreOrchestrator::new(validator.clone(), cipher.clone()),
            run_ids: RunIdGenerator::new(),
            run_guard: tokio::sync::Mutex::new(()),
            config,
            engine,
            validator,
            cipher,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot the live database into every configured destination.
    ///
    /// Destinations are written in configuration order and fail independently.
    /// Successful snapshots are then validated, encrypted when the database
    /// holds sensitive tables, and finally a retention pass runs over all
    /// destinations. If no destination succeeds the run fails with
    /// [`BackupError::AllDestinationsFailed`] and nothing is pruned.
    #[instrument(skip(self), fields(database = %self.config.database_path.display()))]
    pub async fn create_backup(&self) -> Result<BackupRun, BackupError> {
        if self.config.destinations.is_empty() {
            return Err(BackupError::NoDestinations);
        }

        let lock_path = self.config.lock_path();
        let _guard = self
            .run_guard
            .try_lock()
            .map_err(|_| BackupError::RunInProgress(lock_path.clone()))?;
        let _lock = RunLock::acquire(&lock_path, self.config.stale_lock_after())?;

        let timer = Instant::now();
        let start_time = Utc::now();
        let run_id = self.run_ids.next(start_time);
        let source = &self.config.database_path;
        info!(run_id = %run_id, destinations = self.config.destinations.len(), "Starting backup run");

        let sensitive = self.detect_sensitive().await;
        let expect_gdpr = !sensitive || self.cipher.is_some();

        let mut records = Vec::with_capacity(self.config.destinations.len());
        for destination in &self.config.destinations {
            let record = match self.creator.create(source, destination, &run_id, expect_gdpr).await {
                Ok(outcome) => SnapshotRecord {
                    destination_path: destination.clone(),
                    success: true,
                    file_path: outcome.paths.snapshot,
                    file_size_bytes: outcome.file_size_bytes,
                    checksum_hex: outcome.checksum_hex,
                    encrypted: false,
                    encrypted_path: None,
                    plaintext_retained: true,
                    validated: false,
                    error: None,
                },
                Err(e) => {
                    warn!(run_id = %run_id, destination = %destination.display(), error = %e, "Destination failed");
                    let paths = SnapshotPaths::new(destination, &self.config.snapshot_prefix, &run_id);
                    SnapshotRecord::failed(destination.clone(), paths.snapshot, e.to_string())
                }
            };
            records.push(record);
        }

        let successful = records.iter().filter(|r| r.success).count();
        let total = records.len();

        if successful == 0 {
            let run = BackupRun {
                run_id,
                start_time,
                end_time: Utc::now(),
                duration_seconds: timer.elapsed().as_secs_f64(),
                snapshots: records,
                successful_destination_count: 0,
                total_destination_count: total,
                integrity_validated: false,
                gdpr_compliant: false,
                retention: None,
            };
            error!(run_id = %run.run_id, total, "All backup destinations failed, skipping retention");
            return Err(BackupError::AllDestinationsFailed { run: Box::new(run) });
        }

        let mut integrity_validated = true;
        for record in records.iter_mut().filter(|r| r.success) {
            match self.validator.validate(&record.file_path).await {
                Ok(_) => record.validated = true,
                Err(e) => {
                    error!(run_id = %run_id, snapshot = %record.file_path.display(), error = %e, "Snapshot failed validation");
                    integrity_validated = false;
                }
            }
        }

        let mut gdpr_compliant = true;
        if sensitive {
            let encrypted_all = self.encrypt_snapshots(&mut records).await;
            if !encrypted_all {
                integrity_validated = false;
                gdpr_compliant = false;
            }
        }

        let retention = self
            .retention
            .cleanup(&self.config.destinations, self.config.retention_days, false, Some(&run_id))
            .await;
        if !retention.errors.is_empty() {
            warn!(run_id = %run_id, errors = ?retention.errors, "Retention pass reported errors");
        }

        let run = BackupRun {
            run_id,
            start_time,
            end_time: Utc::now(),
            duration_seconds: timer.elapsed().as_secs_f64(),
            snapshots: records,
            successful_destination_count: successful,
            total_destination_count: total,
            integrity_validated,
            gdpr_compliant,
            retention: Some(retention),
        };

        info!(
            run_id = %run.run_id,
            successful,
            total,
            integrity_validated,
            gdpr_compliant,
            duration_seconds = run.duration_seconds,
            "Backup run completed"
        );
        Ok(run)
    }

    async fn detect_sensitive(&self) -> bool {
        if self.config.sensitive_tables.is_empty() {
            return false;
        }
        match crypto::detect_sensitive_data(
            self.engine.as_ref(),
            &self.config.database_path,
            &self.config.sensitive_tables,
        )
        .await
        {
            Ok(found) => !found.is_empty(),
            Err(e) => {
                // Unknown sensitivity is treated as sensitive.
                warn!(error = %e, "Sensitive data detection failed, assuming sensitive");
                true
            }
        }
    }

    /// Encrypt every successful snapshot. Returns false if any could not be encrypted.
    async fn encrypt_snapshots(&self, records: &mut [SnapshotRecord]) -> bool {
        let Some(cipher) = &self.cipher else {
            error!("Sensitive data present but no encryption passphrase configured");
            self.mark_non_compliant(records).await;
            return false;
        };

        let mut all_ok = true;
        for record in records.iter_mut().filter(|r| r.success) {
            let paths = SnapshotPaths::from_file(&record.file_path);
            match cipher.encrypt_file(&record.file_path, &paths.encrypted).await {
                Ok(sealed_size) => {
                    record.encrypted = true;
                    record.encrypted_path = Some(paths.encrypted.clone());

                    if self.config.encryption.delete_plaintext_after_encryption {
                        match tokio::fs::remove_file(&record.file_path).await {
                            Ok(()) => {
                                record.plaintext_retained = false;
                                debug!(snapshot = %record.file_path.display(), "Removed plaintext snapshot after encryption");
                                point_sidecar_at_ciphertext(&paths.metadata, &paths.encrypted, sealed_size).await;
                            }
                            Err(e) => {
                                error!(snapshot = %record.file_path.display(), error = %e, "Failed to remove plaintext snapshot");
                                all_ok = false;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(snapshot = %record.file_path.display(), error = %e, "Snapshot encryption failed");
                    all_ok = false;
                    mark_sidecar_non_compliant(&paths.metadata).await;
                }
            }
        }
        all_ok
    }

    async fn mark_non_compliant(&self, records: &[SnapshotRecord]) {
        for record in records.iter().filter(|r| r.success) {
            mark_sidecar_non_compliant(&SnapshotPaths::from_file(&record.file_path).metadata).await;
        }
    }

    /// Current destinations, retention window and latest snapshot per destination
    pub async fn get_status(&self) -> Result<BackupStatus, BackupError> {
        let mut destinations = Vec::with_capacity(self.config.destinations.len());
        let mut last_known_backups = Vec::new();

        for destination in &self.config.destinations {
            let meta = tokio::fs::metadata(destination).await.ok();
            let mut exists = meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);
            let mut writable = meta.as_ref().map(|m| m.is_dir() && !m.permissions().readonly()).unwrap_or(false);

            // An unreadable destination is reported, not fatal to the query.
            let (snapshots, error) = match self.retention.list_snapshots(destination).await {
                Ok(snapshots) => (snapshots, None),
                Err(e) => {
                    warn!(destination = %destination.display(), error = %e, "Could not list destination snapshots");
                    exists = false;
                    writable = false;
                    (Vec::new(), Some(e.to_string()))
                }
            };
            let latest = snapshots.last();

            if let Some(latest) = latest {
                let metadata = SnapshotMetadata::load(&latest.paths.metadata).await.ok();
                last_known_backups.push(LastKnownBackup {
                    destination: destination.clone(),
                    backup_id: latest.run_id.to_string(),
                    snapshot_path: latest.primary().to_path_buf(),
                    created_at: metadata.as_ref().map(|m| m.created_at),
                    file_size: metadata.as_ref().map(|m| m.file_size),
                    checksum: metadata.map(|m| m.checksum),
                    encrypted: latest.has_encrypted,
                });
            }

            destinations.push(DestinationStatus {
                path: destination.clone(),
                exists,
                writable,
                snapshot_count: snapshots.len(),
                latest_snapshot: latest.map(|s| s.primary().to_path_buf()),
                error,
            });
        }

        Ok(BackupStatus {
            destinations,
            retention_days: self.config.retention_days,
            last_known_backups,
        })
    }

    /// Apply a retention window of `days` across all destinations
    pub async fn cleanup(&self, days: u32, dry_run: bool) -> CleanupReport {
        self.retention
            .cleanup(&self.config.destinations, days, dry_run, None)
            .await
    }

    /// Restore `source` over `target`, defaulting to the configured live database
    pub async fn restore(&self, source: &Path, target: Option<&Path>) -> Result<RestoreRun, BackupError> {
        let target = target.unwrap_or(&self.config.database_path);
        self.restorer.restore(source, target).await
    }
}

/// The sidecar describes the file left on disk; its checksum stays the
/// plaintext checksum that restore verifies after decryption.
async fn point_sidecar_at_ciphertext(path: &Path, encrypted: &Path, sealed_size: u64) {
    let result = match SnapshotMetadata::load(path).await {
        Ok(mut metadata) => {
            metadata.file_path = encrypted.to_path_buf();
            metadata.file_size = sealed_size;
            metadata.store(path, true).await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(metadata = %path.display(), error = %e, "Failed to point metadata sidecar at encrypted snapshot");
    }
}

async fn mark_sidecar_non_compliant(path: &Path) {
    let result = match SnapshotMetadata::load(path).await {
        Ok(mut metadata) => {
            metadata.gdpr_compliant = false;
            metadata.store(path, true).await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(metadata = %path.display(), error = %e, "Failed to flag metadata sidecar as non-compliant");
    }
}

#[async_trait]
impl BackupStatusProvider for BackupOrchestrator {
    async fn backup_status(&self) -> Result<BackupStatus, BackupError> {
        self.get_status().await
    }
}
