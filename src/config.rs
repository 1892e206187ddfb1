//! Engine and monitor configuration
//!
//! Both configs are plain structs with defaults, `with_*` builders, JSON file
//! loading and `RTM_BACKUP_*` environment overrides.

use crate::crypto::{DEFAULT_SALT, MIN_KDF_ITERATIONS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "RTM_BACKUP_";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Snapshot encryption settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Operator passphrase; encryption of sensitive snapshots fails without it
    pub passphrase: Option<String>,
    pub salt: String,
    pub iterations: u32,
    /// Remove the plaintext `.db` once its `.encrypted` copy is written
    pub delete_plaintext_after_encryption: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            passphrase: None,
            salt: DEFAULT_SALT.to_string(),
            iterations: MIN_KDF_ITERATIONS,
            delete_plaintext_after_encryption: true,
        }
    }
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("salt", &self.salt)
            .field("iterations", &self.iterations)
            .field(
                "delete_plaintext_after_encryption",
                &self.delete_plaintext_after_encryption,
            )
            .finish()
    }
}

/// Backup engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Live database file
    pub database_path: PathBuf,
    /// Destination directories, processed in this order
    pub destinations: Vec<PathBuf>,
    pub snapshot_prefix: String,
    pub retention_days: u32,
    /// Tables that must be present and queryable in every snapshot
    pub essential_tables: Vec<String>,
    /// Tables whose presence makes a snapshot subject to encryption
    pub sensitive_tables: Vec<String>,
    pub encryption: EncryptionConfig,
    /// A run lock file older than this is considered abandoned
    pub stale_lock_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("rtm.db"),
            destinations: vec![PathBuf::from("backups")],
            snapshot_prefix: "rtm_backup".to_string(),
            retention_days: 30,
            essential_tables: ["epics", "user_stories", "test_cases", "defects"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            sensitive_tables: vec!["users".to_string()],
            encryption: EncryptionConfig::default(),
            stale_lock_secs: 6 * 3600,
        }
    }
}

impl EngineConfig {
    pub fn new(database_path: impl Into<PathBuf>, destinations: Vec<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            destinations,
            ..Self::default()
        }
    }

    pub fn with_snapshot_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.snapshot_prefix = prefix.into();
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_essential_tables(mut self, tables: Vec<String>) -> Self {
        self.essential_tables = tables;
        self
    }

    pub fn with_sensitive_tables(mut self, tables: Vec<String>) -> Self {
        self.sensitive_tables = tables;
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.encryption.passphrase = Some(passphrase.into());
        self
    }

    pub fn with_plaintext_retention(mut self, keep_plaintext: bool) -> Self {
        self.encryption.delete_plaintext_after_encryption = !keep_plaintext;
        self
    }

    /// Load a JSON config file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults overridden by `RTM_BACKUP_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by full variable name.
    ///
    /// Recognised: `DATABASE_PATH`, `DESTINATIONS` (comma separated),
    /// `PREFIX`, `RETENTION_DAYS`, `ENCRYPTION_KEY`, `KEEP_PLAINTEXT`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(path) = var("DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(list) = var("DESTINATIONS") {
            self.destinations = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(prefix) = var("PREFIX") {
            self.snapshot_prefix = prefix;
        }
        if let Some(days) = var("RETENTION_DAYS") {
            self.retention_days = days.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: format!("{}RETENTION_DAYS", ENV_PREFIX),
                value: days.clone(),
            })?;
        }
        if let Some(key) = var("ENCRYPTION_KEY") {
            self.encryption.passphrase = Some(key);
        }
        if let Some(keep) = var("KEEP_PLAINTEXT") {
            let keep = parse_bool(&keep).ok_or_else(|| ConfigError::InvalidEnv {
                var: format!("{}KEEP_PLAINTEXT", ENV_PREFIX),
                value: keep.clone(),
            })?;
            self.encryption.delete_plaintext_after_encryption = !keep;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destinations.is_empty() {
            return Err(ConfigError::Invalid("at least one destination is required".into()));
        }
        if self.snapshot_prefix.is_empty()
            || !self
                .snapshot_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::Invalid(format!(
                "snapshot prefix '{}' must be non-empty and use [A-Za-z0-9_-]",
                self.snapshot_prefix
            )));
        }
        if matches!(&self.encryption.passphrase, Some(p) if p.is_empty()) {
            return Err(ConfigError::Invalid("encryption passphrase is empty".into()));
        }
        Ok(())
    }

    /// Advisory lock file guarding runs against this database
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .database_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".backup.lock");
        self.database_path.with_file_name(name)
    }

    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }
}

/// Monitor thresholds and history bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Runs longer than this raise a warning
    pub max_duration_minutes: f64,
    /// Minimum acceptable successful/total destination ratio and rolling success rate
    pub min_success_ratio: f64,
    /// Warn when the latest successful run is older than this
    pub max_backup_age_hours: f64,
    pub rolling_window_days: u32,
    pub history_max_entries: usize,
    pub history_max_age_days: u32,
    pub health_check_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_duration_minutes: 30.0,
            min_success_ratio: 0.8,
            max_backup_age_hours: 25.0,
            rolling_window_days: 7,
            history_max_entries: 1000,
            history_max_age_days: 30,
            health_check_timeout_secs: 10,
        }
    }
}

impl MonitorConfig {
    pub fn with_max_duration_minutes(mut self, minutes: f64) -> Self {
        self.max_duration_minutes = minutes;
        self
    }

    pub fn with_min_success_ratio(mut self, ratio: f64) -> Self {
        self.min_success_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_backup_age_hours(mut self, hours: f64) -> Self {
        self.max_backup_age_hours = hours;
        self
    }

    pub fn max_duration_secs(&self) -> f64 {
        self.max_duration_minutes * 60.0
    }

    pub fn max_backup_age(&self) -> chrono::Duration {
        chrono::Duration::seconds((self.max_backup_age_hours * 3600.0) as i64)
    }

    pub fn rolling_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.rolling_window_days))
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.snapshot_prefix, "rtm_backup");
        assert!(config.encryption.delete_plaintext_after_encryption);
        assert_eq!(config.encryption.iterations, MIN_KDF_ITERATIONS);

        let monitor = MonitorConfig::default();
        assert_eq!(monitor.max_duration_secs(), 1800.0);
        assert_eq!(monitor.min_success_ratio, 0.8);
        assert_eq!(monitor.max_backup_age(), chrono::Duration::hours(25));
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::default()
            .with_overrides(lookup(&[
                ("RTM_BACKUP_DATABASE_PATH", "/data/rtm.db"),
                ("RTM_BACKUP_DESTINATIONS", "/mnt/a, /mnt/b,,"),
                ("RTM_BACKUP_RETENTION_DAYS", "7"),
                ("RTM_BACKUP_ENCRYPTION_KEY", "s3cret"),
                ("RTM_BACKUP_KEEP_PLAINTEXT", "yes"),
            ]))
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/data/rtm.db"));
        assert_eq!(
            config.destinations,
            vec![PathBuf::from("/mnt/a"), PathBuf::from("/mnt/b")]
        );
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.encryption.passphrase.as_deref(), Some("s3cret"));
        assert!(!config.encryption.delete_plaintext_after_encryption);
    }

    #[test]
    fn test_invalid_env_value() {
        let result = EngineConfig::default()
            .with_overrides(lookup(&[("RTM_BACKUP_RETENTION_DAYS", "thirty")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_prefix_and_empty_destinations() {
        let config = EngineConfig::new("rtm.db", vec![]);
        assert!(config.validate().is_err());

        let config = EngineConfig::new("rtm.db", vec![PathBuf::from("b")]).with_snapshot_prefix("../x");
        assert!(config.validate().is_err());

        let config = EngineConfig::new("rtm.db", vec![PathBuf::from("b")]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lock_path_sits_next_to_database() {
        let config = EngineConfig::new("/data/rtm.db", vec![]);
        assert_eq!(config.lock_path(), PathBuf::from("/data/rtm.db.backup.lock"));
    }

    #[test]
    fn test_passphrase_redacted_in_debug() {
        let config = EngineConfig::default().with_passphrase("hunter2");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_json_file_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        std::fs::write(&path, r#"{"destinations": ["/a", "/b"], "retention_days": 14}"#).unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.destinations.len(), 2);
        assert_eq!(config.retention_days, 14);
        assert_eq!(config.snapshot_prefix, "rtm_backup");
    }
}
