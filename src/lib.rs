//! # RTM Backup
//!
//! Backup and disaster recovery engine for the RTM database, a single SQLite
//! file holding epics, user stories, test cases and defects.
//!
//! ## Overview
//!
//! A backup run takes a hot snapshot of the live database into every
//! configured destination directory, validates each snapshot, encrypts it when
//! the database holds personal data, and prunes snapshots older than the
//! retention window. A run succeeds when at least one destination received a
//! snapshot. Restores validate the source before touching the target and keep
//! a `*.pre-restore-backup` copy of whatever they overwrite.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rtm_backup::{BackupMonitor, BackupOrchestrator, EngineConfig, MonitorConfig};
//! use std::path::PathBuf;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::new("rtm.db", vec![PathBuf::from("/mnt/backups")])
//!     .with_passphrase("correct horse battery staple");
//! let orchestrator = BackupOrchestrator::new(config)?;
//! let monitor = BackupMonitor::new(MonitorConfig::default());
//!
//! let report = monitor.run(|| orchestrator.create_backup()).await;
//! for alert in &report.alerts {
//!     println!("{}: {}", alert.level, alert.title);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`database`]: storage engine collaborator (hot backup, self-check, row counts)
//! - [`integrity`]: checksums and snapshot validation
//! - [`crypto`]: passphrase-derived AES-256-GCM snapshot encryption
//! - [`snapshot`]: single-destination snapshot creation and metadata sidecars
//! - [`backup`]: multi-destination orchestration, retention, restore
//! - [`monitor`]: metrics, alert rules, health checks and the SLA dashboard
//! - [`config`]: engine and monitor configuration

pub mod backup;
pub mod config;
pub mod crypto;
pub mod database;
pub mod integrity;
pub mod monitor;
pub mod snapshot;

pub use backup::{
    BackupError, BackupOrchestrator, BackupRun, BackupStatus, BackupStatusProvider, CleanupReport,
    RestoreRun, RetentionCandidate, SnapshotRecord,
};
pub use config::{ConfigError, EncryptionConfig, EngineConfig, MonitorConfig};
pub use crypto::{EncryptionError, SnapshotCipher};
pub use database::{DatabaseEngine, DatabaseError, SqliteEngine};
pub use integrity::{IntegrityError, IntegrityValidator};
pub use monitor::{Alert, AlertLevel, AlertSink, BackupMetric, BackupMonitor, HealthReport, HealthStatus, MonitorHistory};
pub use snapshot::{RunId, SnapshotError, SnapshotMetadata};

/// Result type for backup operations
pub type Result<T> = std::result::Result<T, BackupError>;
