// Backup and Recovery System - Multi-destination snapshots, retention and restore
// for the RTM database

use async_trait::async_trait;

pub mod lock;
pub mod orchestrator;
pub mod restore;
pub mod retention;
pub mod types;

pub use lock::RunLock;
pub use orchestrator::BackupOrchestrator;
pub use restore::{recovery_time_target_met, safety_copy_path, RestoreOrchestrator, RECOVERY_TIME_OBJECTIVE_SECS};
pub use retention::{CleanupReport, DiscoveredSnapshot, RetentionCandidate, RetentionManager};
pub use types::{
    BackupError, BackupRun, BackupStatus, DestinationStatus, LastKnownBackup, RestoreRun,
    RestoreStage, RunStatus, SnapshotRecord,
};

/// Anything that can report backup status to the monitor's health check
#[async_trait]
pub trait BackupStatusProvider: Send + Sync {
    async fn backup_status(&self) -> Result<BackupStatus, BackupError>;
}
