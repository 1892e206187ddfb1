// Integration tests for the backup monitor: alerting, sinks, health and dashboard

mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::Fixture;
use parking_lot::Mutex;
use rtm_backup::backup::{BackupStatus, SnapshotRecord};
use rtm_backup::monitor::sinks::{AlertDispatchError, EmailAlertSink, EmailMessage, MailTransport};
use rtm_backup::monitor::{AlertSink, CheckStatus, HealthStatus};
use rtm_backup::{
    Alert, AlertLevel, BackupError, BackupMonitor, BackupOrchestrator, BackupRun, BackupStatusProvider,
    MonitorConfig, MonitorHistory, RunId,
};
use std::path::PathBuf;
use std::sync::Arc;

fn finished_run(successful: usize, total: usize, duration_seconds: f64) -> BackupRun {
    let end_time = Utc::now();
    let snapshots = (0..total)
        .map(|i| SnapshotRecord {
            destination_path: PathBuf::from(format!("/backups/{}", i)),
            success: i < successful,
            file_path: PathBuf::from(format!("/backups/{}/rtm_backup_20250101_000000.db", i)),
            file_size_bytes: if i < successful { 4096 } else { 0 },
            checksum_hex: String::new(),
            encrypted: false,
            encrypted_path: None,
            plaintext_retained: i < successful,
            validated: i < successful,
            error: if i < successful { None } else { Some("destination unavailable".to_string()) },
        })
        .collect();

    BackupRun {
        run_id: RunId::from("20250101_000000"),
        start_time: end_time - ChronoDuration::milliseconds((duration_seconds * 1000.0) as i64),
        end_time,
        duration_seconds,
        snapshots,
        successful_destination_count: successful,
        total_destination_count: total,
        integrity_validated: successful > 0,
        gdpr_compliant: true,
        retention: None,
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<Alert>>);

#[async_trait]
impl AlertSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertDispatchError> {
        self.0.lock().push(alert.clone());
        Ok(())
    }
}

struct FailingTransport;

#[async_trait]
impl MailTransport for FailingTransport {
    async fn deliver(&self, _message: EmailMessage) -> Result<(), AlertDispatchError> {
        Err(AlertDispatchError::Transport("smtp connection refused".to_string()))
    }
}

struct UnreachableProvider;

#[async_trait]
impl BackupStatusProvider for UnreachableProvider {
    async fn backup_status(&self) -> Result<BackupStatus, BackupError> {
        Err(BackupError::NoDestinations)
    }
}

struct HangingProvider;

#[async_trait]
impl BackupStatusProvider for HangingProvider {
    async fn backup_status(&self) -> Result<BackupStatus, BackupError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Err(BackupError::NoDestinations)
    }
}

#[tokio::test]
async fn test_long_run_raises_exactly_one_duration_warning() {
    let monitor = BackupMonitor::new(MonitorConfig::default());

    let report = monitor
        .run(|| async { Ok(finished_run(2, 2, 40.0 * 60.0)) })
        .await;

    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].level, AlertLevel::Warning);
    assert_eq!(report.alerts[0].title, "Backup Duration Exceeded");

    let history = monitor.alerts();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].title, "Backup Duration Exceeded");
    assert!(report.metric.success);
}

#[tokio::test]
async fn test_total_failure_from_orchestrator_is_critical() {
    let fixture = Fixture::new(2, false).await;
    for destination in &fixture.destinations {
        std::fs::remove_dir(destination).unwrap();
    }
    let orchestrator = BackupOrchestrator::new(fixture.config()).unwrap();
    let monitor = BackupMonitor::new(MonitorConfig::default());

    let report = monitor.run(|| orchestrator.create_backup()).await;

    assert!(!report.metric.success);
    assert_eq!(report.metric.total_destinations, 2);
    assert!(report.error.is_some());
    assert_eq!(report.run.as_ref().unwrap().successful_destination_count, 0);

    let critical: Vec<_> = report.alerts.iter().filter(|a| a.level == AlertLevel::Critical).collect();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].title, "Backup Failed");
    assert!(report.alerts.iter().all(|a| a.title != "Backup Destination Failures"));
}

#[tokio::test]
async fn test_partial_failure_raises_ratio_error() {
    let monitor = BackupMonitor::new(MonitorConfig::default());

    let report = monitor.run(|| async { Ok(finished_run(1, 2, 30.0)) }).await;

    let titles: Vec<_> = report.alerts.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["Backup Destination Failures"]);
    assert_eq!(report.alerts[0].level, AlertLevel::Error);
}

#[tokio::test]
async fn test_sink_failures_never_escape() {
    let recording = Arc::new(RecordingSink::default());
    let email = Arc::new(EmailAlertSink::new(
        Arc::new(FailingTransport),
        "backup@rtm.local",
        vec!["ops@rtm.local".to_string()],
    ));
    let monitor = BackupMonitor::new(MonitorConfig::default())
        .with_notification_sink(email)
        .with_notification_sink(recording.clone());

    let report = monitor.run(|| async { Err(BackupError::NoDestinations) }).await;

    assert!(!report.metric.success);
    assert!(!report.alerts.is_empty());
    assert_eq!(monitor.alerts().len(), report.alerts.len());
    assert_eq!(recording.0.lock().len(), report.alerts.len());
}

#[tokio::test]
async fn test_only_warning_and_above_reach_sinks() {
    let recording = Arc::new(RecordingSink::default());
    let monitor = BackupMonitor::new(MonitorConfig::default()).with_notification_sink(recording.clone());

    monitor.run(|| async { Ok(finished_run(2, 2, 10.0)) }).await;
    assert!(recording.0.lock().is_empty());

    monitor.run(|| async { Ok(finished_run(1, 2, 10.0)) }).await;
    let delivered = recording.0.lock();
    assert!(!delivered.is_empty());
    assert!(delivered.iter().all(|a| a.level >= AlertLevel::Warning));
}

#[tokio::test]
async fn test_shared_history_is_used() {
    let history = Arc::new(MonitorHistory::default());
    let monitor = BackupMonitor::new(MonitorConfig::default()).with_history(history.clone());

    monitor.run(|| async { Ok(finished_run(2, 2, 10.0)) }).await;
    monitor.run(|| async { Ok(finished_run(2, 2, 12.0)) }).await;

    assert_eq!(history.metrics().len(), 2);
}

#[tokio::test]
async fn test_health_is_healthy_after_recent_success_with_channel() {
    let fixture = Fixture::new(2, false).await;
    let orchestrator = BackupOrchestrator::new(fixture.config()).unwrap();
    let monitor = BackupMonitor::new(MonitorConfig::default())
        .with_notification_sink(Arc::new(RecordingSink::default()));

    monitor.run(|| orchestrator.create_backup()).await;
    let report = monitor.health_check(&orchestrator).await;

    assert_eq!(report.overall, HealthStatus::Healthy);
    assert_eq!(report.checks.len(), 3);
    assert!(report.checks.iter().all(|c| c.status == CheckStatus::Pass));
}

#[tokio::test]
async fn test_health_is_degraded_without_channel_or_recent_backup() {
    let fixture = Fixture::new(1, false).await;
    let orchestrator = BackupOrchestrator::new(fixture.config()).unwrap();
    let monitor = BackupMonitor::new(MonitorConfig::default());

    let report = monitor.health_check(&orchestrator).await;

    assert_eq!(report.overall, HealthStatus::Degraded);
    let recent = report.checks.iter().find(|c| c.name == "recent_backup").unwrap();
    assert_eq!(recent.status, CheckStatus::Warn);
    let channel = report.checks.iter().find(|c| c.name == "alert_channel").unwrap();
    assert_eq!(channel.status, CheckStatus::Warn);
}

#[tokio::test]
async fn test_unreadable_destination_degrades_health() {
    let fixture = Fixture::new(2, false).await;
    std::fs::remove_dir(&fixture.destinations[1]).unwrap();
    std::fs::write(&fixture.destinations[1], b"not a directory").unwrap();
    let orchestrator = BackupOrchestrator::new(fixture.config()).unwrap();
    let monitor = BackupMonitor::new(MonitorConfig::default())
        .with_notification_sink(Arc::new(RecordingSink::default()));

    let report = monitor.run(|| orchestrator.create_backup()).await;
    assert!(report.metric.success);

    let status = orchestrator.get_status().await.unwrap();
    assert!(status.destinations[0].error.is_none());
    assert_eq!(status.destinations[0].snapshot_count, 1);
    let broken = &status.destinations[1];
    assert!(!broken.exists && !broken.writable);
    assert_eq!(broken.snapshot_count, 0);
    assert!(broken.error.is_some());

    let health = monitor.health_check(&orchestrator).await;
    assert_eq!(health.overall, HealthStatus::Degraded);
    let check = health.checks.iter().find(|c| c.name == "orchestrator").unwrap();
    assert_eq!(check.status, CheckStatus::Warn);
    let recent = health.checks.iter().find(|c| c.name == "recent_backup").unwrap();
    assert_eq!(recent.status, CheckStatus::Pass);
}

#[tokio::test]
async fn test_health_is_unhealthy_when_orchestrator_unreachable() {
    let monitor = BackupMonitor::new(MonitorConfig::default())
        .with_notification_sink(Arc::new(RecordingSink::default()));

    let report = monitor.health_check(&UnreachableProvider).await;

    assert_eq!(report.overall, HealthStatus::Unhealthy);
    assert_eq!(report.checks.len(), 3);
    let orchestrator = report.checks.iter().find(|c| c.name == "orchestrator").unwrap();
    assert_eq!(orchestrator.status, CheckStatus::Fail);
}

#[tokio::test]
async fn test_health_check_times_out() {
    let config = MonitorConfig {
        health_check_timeout_secs: 0,
        ..MonitorConfig::default()
    };
    let monitor = BackupMonitor::new(config);

    let report = monitor.health_check(&HangingProvider).await;

    assert_eq!(report.overall, HealthStatus::Unhealthy);
    assert!(report.checks[0].message.contains("timed out"));
}

#[tokio::test]
async fn test_dashboard_reflects_history() {
    let monitor = BackupMonitor::new(MonitorConfig::default());
    monitor.run(|| async { Ok(finished_run(2, 2, 60.0)) }).await;
    monitor.run(|| async { Ok(finished_run(2, 2, 45.0 * 60.0)) }).await;
    monitor.run(|| async { Err(BackupError::NoDestinations) }).await;

    let summary = monitor.dashboard();

    assert_eq!(summary.total_runs, 3);
    assert_eq!(summary.successful_runs, 2);
    assert_eq!(summary.failed_runs, 1);
    assert_eq!(summary.last_24h.runs, 3);
    assert_eq!(summary.last_7d.runs, 3);
    assert!((summary.sla_compliance_rate - 2.0 / 3.0).abs() < 1e-9);
    assert!(summary.last_run.is_some());
    assert_eq!(summary.alerts_by_level[&AlertLevel::Critical], 1);
    assert!(summary.alerts_by_level[&AlertLevel::Warning] >= 1);
    assert_eq!(monitor.history().metrics().len(), 3);
}
