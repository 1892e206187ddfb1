//! Bounded in-process history of backup metrics and alerts

use super::types::{Alert, BackupMetric};
use crate::config::MonitorConfig;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;

/// Metric and alert history for one monitor.
///
/// Both collections keep at most `max_entries` items and drop anything older
/// than `max_age`. Create one per process (or per test) and share it by
/// reference or `Arc`.
#[derive(Debug)]
pub struct MonitorHistory {
    metrics: RwLock<VecDeque<BackupMetric>>,
    alerts: RwLock<VecDeque<Alert>>,
    max_entries: usize,
    max_age: Duration,
}

impl MonitorHistory {
    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        Self {
            metrics: RwLock::new(VecDeque::new()),
            alerts: RwLock::new(VecDeque::new()),
            max_entries: max_entries.max(1),
            max_age,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.history_max_entries,
            Duration::days(i64::from(config.history_max_age_days)),
        )
    }

    pub fn record_metric(&self, metric: BackupMetric) {
        let mut metrics = self.metrics.write();
        metrics.push_back(metric);
        self.prune(&mut *metrics, |m| m.timestamp);
    }

    pub fn record_alert(&self, alert: Alert) {
        let mut alerts = self.alerts.write();
        alerts.push_back(alert);
        self.prune(&mut *alerts, |a| a.timestamp);
    }

    fn prune<T>(&self, items: &mut VecDeque<T>, timestamp: impl Fn(&T) -> DateTime<Utc>) {
        while items.len() > self.max_entries {
            items.pop_front();
        }
        let cutoff = Utc::now() - self.max_age;
        items.retain(|item| timestamp(item) >= cutoff);
    }

    /// All retained metrics, oldest first
    pub fn metrics(&self) -> Vec<BackupMetric> {
        self.metrics.read().iter().cloned().collect()
    }

    /// All retained alerts, oldest first
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().iter().cloned().collect()
    }

    pub fn metrics_since(&self, since: DateTime<Utc>) -> Vec<BackupMetric> {
        self.metrics
            .read()
            .iter()
            .filter(|m| m.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn latest_metric(&self) -> Option<BackupMetric> {
        self.metrics.read().back().cloned()
    }

    /// Timestamp of the most recent successful run
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.metrics
            .read()
            .iter()
            .filter(|m| m.success)
            .map(|m| m.timestamp)
            .max()
    }

    /// Share of successful runs since `since`; `None` when there were no runs
    pub fn success_rate_since(&self, since: DateTime<Utc>) -> Option<f64> {
        let metrics = self.metrics.read();
        let window: Vec<_> = metrics.iter().filter(|m| m.timestamp >= since).collect();
        if window.is_empty() {
            return None;
        }
        let successes = window.iter().filter(|m| m.success).count();
        Some(successes as f64 / window.len() as f64)
    }

    pub fn clear(&self) {
        self.metrics.write().clear();
        self.alerts.write().clear();
    }
}

impl Default for MonitorHistory {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(success: bool, age: Duration) -> BackupMetric {
        BackupMetric {
            run_id: None,
            timestamp: Utc::now() - age,
            duration_seconds: 1.0,
            success,
            successful_destinations: usize::from(success),
            total_destinations: 1,
            success_ratio: if success { 1.0 } else { 0.0 },
            integrity_validated: success,
            total_size_bytes: 0,
            encrypted: false,
            error: None,
        }
    }

    #[test]
    fn test_bounded_by_entries() {
        let history = MonitorHistory::new(3, Duration::days(30));
        for _ in 0..5 {
            history.record_metric(metric(true, Duration::zero()));
        }
        assert_eq!(history.metrics().len(), 3);
    }

    #[test]
    fn test_bounded_by_age() {
        let history = MonitorHistory::new(100, Duration::days(30));
        history.record_metric(metric(true, Duration::days(31)));
        history.record_metric(metric(false, Duration::days(1)));

        let metrics = history.metrics();
        assert_eq!(metrics.len(), 1);
        assert!(!metrics[0].success);
        assert!(history.last_success().is_none());
    }

    #[test]
    fn test_success_rate_window() {
        let history = MonitorHistory::default();
        history.record_metric(metric(false, Duration::days(10)));
        history.record_metric(metric(true, Duration::days(2)));
        history.record_metric(metric(false, Duration::days(1)));

        let rate = history.success_rate_since(Utc::now() - Duration::days(7)).unwrap();
        assert!((rate - 0.5).abs() < f64::EPSILON);
        assert!(history.success_rate_since(Utc::now()).is_none());
    }
}
