//! Monitoring records: metrics, alerts and health reports

use crate::backup::{BackupError, BackupRun, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub const ALL: [AlertLevel; 4] = [
        AlertLevel::Info,
        AlertLevel::Warning,
        AlertLevel::Error,
        AlertLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }

    /// Whether alerts at this level go to notification sinks
    pub fn is_notifiable(&self) -> bool {
        *self >= AlertLevel::Warning
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raised alert. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl Alert {
    pub fn new(level: AlertLevel, title: impl Into<String>, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            level,
            title: title.into(),
            message: message.into(),
            timestamp,
            component: "backup".to_string(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Monitoring summary of one backup attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetric {
    pub run_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: f64,
    pub success: bool,
    pub successful_destinations: usize,
    pub total_destinations: usize,
    pub success_ratio: f64,
    pub integrity_validated: bool,
    pub total_size_bytes: u64,
    pub encrypted: bool,
    pub error: Option<String>,
}

impl BackupMetric {
    pub fn from_run(run: &BackupRun) -> Self {
        let success_ratio = if run.total_destination_count == 0 {
            0.0
        } else {
            run.successful_destination_count as f64 / run.total_destination_count as f64
        };

        Self {
            run_id: Some(run.run_id.to_string()),
            timestamp: run.end_time,
            duration_seconds: run.duration_seconds,
            success: run.status() == RunStatus::Success,
            successful_destinations: run.successful_destination_count,
            total_destinations: run.total_destination_count,
            success_ratio,
            integrity_validated: run.integrity_validated,
            total_size_bytes: run.total_size_bytes(),
            encrypted: run.snapshots.iter().any(|s| s.encrypted),
            error: None,
        }
    }

    /// Metric for an attempt that returned an error. A total destination
    /// failure keeps the counts of the run it carries.
    pub fn failed(error: &BackupError, duration_seconds: f64, timestamp: DateTime<Utc>) -> Self {
        let mut metric = match error.failed_run() {
            Some(run) => Self::from_run(run),
            None => Self {
                run_id: None,
                timestamp,
                duration_seconds,
                success: false,
                successful_destinations: 0,
                total_destinations: 0,
                success_ratio: 0.0,
                integrity_validated: false,
                total_size_bytes: 0,
                encrypted: false,
                error: None,
            },
        };
        metric.success = false;
        metric.error = Some(error.to_string());
        metric
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// One sub-check of a health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

impl HealthCheck {
    pub fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Overall verdict: any failed check is unhealthy, any warning is degraded
    pub fn from_checks(checks: &[HealthCheck]) -> Self {
        if checks.iter().any(|c| c.status == CheckStatus::Fail) {
            HealthStatus::Unhealthy
        } else if checks.iter().any(|c| c.status == CheckStatus::Warn) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub checked_at: DateTime<Utc>,
}

/// What `BackupMonitor::run` hands back to its caller
#[derive(Debug, Clone)]
pub struct MonitorReport {
    pub metric: BackupMetric,
    pub alerts: Vec<Alert>,
    /// The run, when the backup returned one
    pub run: Option<BackupRun>,
    /// Display text of the backup error, if any
    pub error: Option<String>,
    /// The trigger overlapped a run in progress; `metric` was not recorded
    pub skipped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_levels_are_ordered() {
        assert!(AlertLevel::Info < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Error);
        assert!(AlertLevel::Error < AlertLevel::Critical);
        assert!(!AlertLevel::Info.is_notifiable());
        assert!(AlertLevel::Warning.is_notifiable());
    }

    #[test]
    fn test_failed_metric_without_run() {
        let metric = BackupMetric::failed(&BackupError::NoDestinations, 0.5, Utc::now());
        assert!(!metric.success);
        assert_eq!(metric.total_destinations, 0);
        assert_eq!(metric.success_ratio, 0.0);
        assert!(metric.error.unwrap().contains("no backup destinations"));
    }

    #[test]
    fn test_health_verdict() {
        let pass = HealthCheck::new("a", CheckStatus::Pass, "");
        let warn = HealthCheck::new("b", CheckStatus::Warn, "");
        let fail = HealthCheck::new("c", CheckStatus::Fail, "");

        assert_eq!(HealthStatus::from_checks(&[pass.clone()]), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_checks(&[pass.clone(), warn.clone()]), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_checks(&[pass, warn, fail]), HealthStatus::Unhealthy);
    }
}
