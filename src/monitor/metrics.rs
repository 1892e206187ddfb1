//! Prometheus metrics for backup runs, restores and alerting

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Backup runs by outcome
    pub static ref BACKUP_RUNS: IntCounterVec = register_int_counter_vec!(
        "rtm_backup_runs_total",
        "Total number of backup runs",
        &["status"]
    ).unwrap();

    /// Backup run duration
    pub static ref BACKUP_DURATION: HistogramVec = register_histogram_vec!(
        "rtm_backup_duration_seconds",
        "Backup run duration in seconds",
        &["status"],
        vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]
    ).unwrap();

    /// Destination writes by outcome
    pub static ref DESTINATION_WRITES: IntCounterVec = register_int_counter_vec!(
        "rtm_backup_destination_writes_total",
        "Total number of snapshot writes per destination outcome",
        &["status"]
    ).unwrap();

    /// Restore duration, bucketed around the recovery time objective
    pub static ref RESTORE_DURATION: HistogramVec = register_histogram_vec!(
        "rtm_restore_duration_seconds",
        "Restore duration in seconds",
        &["status"],
        vec![1.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();

    /// Alerts raised by level
    pub static ref ALERTS_RAISED: IntCounterVec = register_int_counter_vec!(
        "rtm_backup_alerts_total",
        "Total number of backup alerts raised",
        &["level"]
    ).unwrap();

    /// Notification sink failures
    pub static ref ALERT_DISPATCH_FAILURES: IntCounterVec = register_int_counter_vec!(
        "rtm_backup_alert_dispatch_failures_total",
        "Total number of alert notifications that could not be delivered",
        &["sink"]
    ).unwrap();
}

fn status_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Record a finished backup run
pub fn record_run(duration_secs: f64, success: bool, successful_destinations: usize, failed_destinations: usize) {
    let status = status_label(success);
    BACKUP_RUNS.with_label_values(&[status]).inc();
    BACKUP_DURATION.with_label_values(&[status]).observe(duration_secs);
    DESTINATION_WRITES
        .with_label_values(&["success"])
        .inc_by(successful_destinations as u64);
    DESTINATION_WRITES
        .with_label_values(&["failure"])
        .inc_by(failed_destinations as u64);
}

/// Record a finished restore
pub fn record_restore(duration_secs: f64, success: bool) {
    RESTORE_DURATION
        .with_label_values(&[status_label(success)])
        .observe(duration_secs);
}

pub fn record_alert(level: &str) {
    ALERTS_RAISED.with_label_values(&[level]).inc();
}

pub fn record_dispatch_failure(sink: &str) {
    ALERT_DISPATCH_FAILURES.with_label_values(&[sink]).inc();
}

/// All registered metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| format!("Failed to convert metrics to UTF-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_recorded_series() {
        record_run(12.5, true, 2, 1);
        record_restore(3.0, true);
        record_alert("warning");

        let text = gather_metrics().unwrap();
        assert!(text.contains("rtm_backup_runs_total"));
        assert!(text.contains("rtm_backup_destination_writes_total"));
        assert!(text.contains("rtm_restore_duration_seconds"));
        assert!(text.contains("rtm_backup_alerts_total"));
    }
}
