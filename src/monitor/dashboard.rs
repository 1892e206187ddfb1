//! SLA dashboard computed from metric history

use super::types::{Alert, AlertLevel, BackupMetric};
use crate::config::MonitorConfig;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub runs: usize,
    pub successful_runs: usize,
    pub success_rate: f64,
    pub average_duration_seconds: f64,
    pub total_size_bytes: u64,
}

impl WindowSummary {
    fn over<'a>(metrics: impl Iterator<Item = &'a BackupMetric>) -> Self {
        let mut runs = 0;
        let mut successful_runs = 0;
        let mut duration = 0.0;
        let mut total_size_bytes = 0;
        for metric in metrics {
            runs += 1;
            duration += metric.duration_seconds;
            total_size_bytes += metric.total_size_bytes;
            if metric.success {
                successful_runs += 1;
            }
        }

        Self {
            runs,
            successful_runs,
            success_rate: ratio(successful_runs, runs),
            average_duration_seconds: if runs == 0 { 0.0 } else { duration / runs as f64 },
            total_size_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub generated_at: DateTime<Utc>,
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub success_rate: f64,
    /// Share of runs that finished within the configured maximum duration
    pub sla_compliance_rate: f64,
    pub average_duration_seconds: f64,
    pub last_run: Option<BackupMetric>,
    pub last_24h: WindowSummary,
    pub last_7d: WindowSummary,
    pub alerts_by_level: BTreeMap<AlertLevel, usize>,
}

/// Summarize `metrics` and `alerts` as of `now`. Rates are 0.0 when there
/// is nothing to rate.
pub fn summarize(
    config: &MonitorConfig,
    metrics: &[BackupMetric],
    alerts: &[Alert],
    now: DateTime<Utc>,
) -> DashboardSummary {
    let all = WindowSummary::over(metrics.iter());
    let max_duration = config.max_duration_secs();
    let compliant = metrics
        .iter()
        .filter(|m| m.duration_seconds <= max_duration)
        .count();

    let day_ago = now - Duration::hours(24);
    let week_ago = now - Duration::days(7);

    let mut alerts_by_level: BTreeMap<AlertLevel, usize> =
        AlertLevel::ALL.iter().map(|level| (*level, 0)).collect();
    for alert in alerts {
        *alerts_by_level.entry(alert.level).or_insert(0) += 1;
    }

    DashboardSummary {
        generated_at: now,
        total_runs: all.runs,
        successful_runs: all.successful_runs,
        failed_runs: all.runs - all.successful_runs,
        success_rate: all.success_rate,
        sla_compliance_rate: ratio(compliant, metrics.len()),
        average_duration_seconds: all.average_duration_seconds,
        last_run: metrics.iter().max_by_key(|m| m.timestamp).cloned(),
        last_24h: WindowSummary::over(metrics.iter().filter(|m| m.timestamp >= day_ago)),
        last_7d: WindowSummary::over(metrics.iter().filter(|m| m.timestamp >= week_ago)),
        alerts_by_level,
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metric(success: bool, duration_seconds: f64, at: DateTime<Utc>) -> BackupMetric {
        BackupMetric {
            run_id: None,
            timestamp: at,
            duration_seconds,
            success,
            successful_destinations: usize::from(success),
            total_destinations: 1,
            success_ratio: if success { 1.0 } else { 0.0 },
            integrity_validated: success,
            total_size_bytes: 100,
            encrypted: false,
            error: None,
        }
    }

    #[test]
    fn test_empty_history() {
        let summary = summarize(&MonitorConfig::default(), &[], &[], Utc::now());
        assert_eq!(summary.total_runs, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.sla_compliance_rate, 0.0);
        assert!(summary.last_run.is_none());
        assert_eq!(summary.alerts_by_level.values().sum::<usize>(), 0);
    }

    #[test]
    fn test_windows_and_sla() {
        let now = Utc::now();
        let metrics = vec![
            metric(true, 60.0, now - Duration::days(10)),
            metric(false, 45.0 * 60.0, now - Duration::days(3)),
            metric(true, 120.0, now - Duration::hours(2)),
        ];
        let alerts = vec![
            Alert::new(AlertLevel::Warning, "Backup Duration Exceeded", "slow", now),
            Alert::new(AlertLevel::Critical, "Backup Failed", "down", now),
        ];

        let summary = summarize(&MonitorConfig::default(), &metrics, &alerts, now);

        assert_eq!(summary.total_runs, 3);
        assert_eq!(summary.failed_runs, 1);
        assert!((summary.sla_compliance_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.last_24h.runs, 1);
        assert_eq!(summary.last_7d.runs, 2);
        assert_eq!(summary.last_7d.successful_runs, 1);
        assert_eq!(summary.last_run.unwrap().duration_seconds, 120.0);
        assert_eq!(summary.alerts_by_level[&AlertLevel::Warning], 1);
        assert_eq!(summary.alerts_by_level[&AlertLevel::Error], 0);
    }
}
