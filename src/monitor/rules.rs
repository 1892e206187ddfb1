//! Threshold rules evaluated after every monitored backup

use super::history::MonitorHistory;
use super::types::{Alert, AlertLevel, BackupMetric};
use crate::config::MonitorConfig;
use chrono::{DateTime, Utc};

pub const TITLE_DURATION_EXCEEDED: &str = "Backup Duration Exceeded";
pub const TITLE_DESTINATION_FAILURES: &str = "Backup Destination Failures";
pub const TITLE_BACKUP_FAILED: &str = "Backup Failed";
pub const TITLE_INTEGRITY_FAILED: &str = "Backup Integrity Validation Failed";
pub const TITLE_BACKUP_TOO_OLD: &str = "Backup Too Old";
pub const TITLE_LOW_SUCCESS_RATE: &str = "Low Backup Success Rate";
pub const TITLE_RUN_SKIPPED: &str = "Backup Run Skipped";

/// Evaluate every rule for `metric`.
///
/// `history` is expected to already contain `metric`, so the freshness and
/// rolling success-rate rules see the run that was just recorded. Each
/// triggered rule yields exactly one alert.
pub fn evaluate(
    config: &MonitorConfig,
    metric: &BackupMetric,
    history: &MonitorHistory,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let run_id = metric.run_id.clone().unwrap_or_default();

    let max_duration = config.max_duration_secs();
    if metric.duration_seconds > max_duration {
        alerts.push(
            Alert::new(
                AlertLevel::Warning,
                TITLE_DURATION_EXCEEDED,
                format!(
                    "Backup took {:.1} minutes, above the {:.1} minute limit",
                    metric.duration_seconds / 60.0,
                    config.max_duration_minutes
                ),
                now,
            )
            .with_component("backup_duration")
            .with_detail("run_id", run_id.clone())
            .with_detail("duration_seconds", metric.duration_seconds)
            .with_detail("max_duration_seconds", max_duration),
        );
    }

    // Total failure and partial failure are reported by exactly one of these.
    if metric.successful_destinations == 0 || !metric.success {
        alerts.push(
            Alert::new(
                AlertLevel::Critical,
                TITLE_BACKUP_FAILED,
                match &metric.error {
                    Some(error) => format!("No destination received a snapshot: {}", error),
                    None => "No destination received a snapshot".to_string(),
                },
                now,
            )
            .with_component("backup_run")
            .with_detail("run_id", run_id.clone())
            .with_detail("total_destinations", metric.total_destinations),
        );
    } else if metric.success_ratio < config.min_success_ratio {
        alerts.push(
            Alert::new(
                AlertLevel::Error,
                TITLE_DESTINATION_FAILURES,
                format!(
                    "{} of {} destinations succeeded ({:.0}% < {:.0}%)",
                    metric.successful_destinations,
                    metric.total_destinations,
                    metric.success_ratio * 100.0,
                    config.min_success_ratio * 100.0
                ),
                now,
            )
            .with_component("backup_destinations")
            .with_detail("run_id", run_id.clone())
            .with_detail("success_ratio", metric.success_ratio)
            .with_detail("successful_destinations", metric.successful_destinations)
            .with_detail("total_destinations", metric.total_destinations),
        );
    }

    if metric.success && !metric.integrity_validated {
        alerts.push(
            Alert::new(
                AlertLevel::Error,
                TITLE_INTEGRITY_FAILED,
                "At least one snapshot failed validation or could not be encrypted",
                now,
            )
            .with_component("backup_integrity")
            .with_detail("run_id", run_id.clone()),
        );
    }

    let max_age = config.max_backup_age();
    let fresh = history
        .last_success()
        .map(|at| now - at <= max_age)
        .unwrap_or(false);
    if !fresh {
        let message = match history.last_success() {
            Some(at) => format!(
                "Last successful backup was {:.1} hours ago",
                (now - at).num_seconds() as f64 / 3600.0
            ),
            None => "No successful backup on record".to_string(),
        };
        alerts.push(
            Alert::new(AlertLevel::Warning, TITLE_BACKUP_TOO_OLD, message, now)
                .with_component("backup_freshness")
                .with_detail("max_backup_age_hours", config.max_backup_age_hours),
        );
    }

    if let Some(rate) = history.success_rate_since(now - config.rolling_window()) {
        if rate < config.min_success_ratio {
            alerts.push(
                Alert::new(
                    AlertLevel::Error,
                    TITLE_LOW_SUCCESS_RATE,
                    format!(
                        "{}-day success rate is {:.0}%, below {:.0}%",
                        config.rolling_window_days,
                        rate * 100.0,
                        config.min_success_ratio * 100.0
                    ),
                    now,
                )
                .with_component("backup_sla")
                .with_detail("success_rate", rate)
                .with_detail("window_days", config.rolling_window_days),
            );
        }
    }

    alerts
}
