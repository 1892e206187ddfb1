//! Backup monitor: wraps runs, raises alerts and answers health checks

use super::dashboard::{self, DashboardSummary};
use super::history::MonitorHistory;
use super::metrics;
use super::rules;
use super::sinks::{AlertSink, LogAlertSink};
use super::types::{Alert, AlertLevel, BackupMetric, CheckStatus, HealthCheck, HealthReport, HealthStatus, MonitorReport};
use crate::backup::{BackupError, BackupRun, BackupStatus, BackupStatusProvider};
use crate::config::MonitorConfig;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

pub struct BackupMonitor {
    config: MonitorConfig,
    history: Arc<MonitorHistory>,
    log_sink: LogAlertSink,
    notification_sinks: Vec<Arc<dyn AlertSink>>,
}

impl BackupMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            history: Arc::new(MonitorHistory::from_config(&config)),
            config,
            log_sink: LogAlertSink,
            notification_sinks: Vec::new(),
        }
    }

    /// Use a shared history instead of a private one
    pub fn with_history(mut self, history: Arc<MonitorHistory>) -> Self {
        self.history = history;
        self
    }

    /// Route alerts at warning level and above to `sink`
    pub fn with_notification_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.notification_sinks.push(sink);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn history(&self) -> &Arc<MonitorHistory> {
        &self.history
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.history.alerts()
    }

    /// Run one backup and evaluate it.
    ///
    /// Never fails: a backup error becomes a failed metric and, usually, a
    /// critical alert. A trigger refused by the run lock is reported as
    /// skipped and is not recorded. Notification sink failures are logged
    /// and counted.
    pub async fn run<F, Fut>(&self, backup: F) -> MonitorReport
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<BackupRun, BackupError>>,
    {
        let timer = Instant::now();
        let result = backup().await;
        let elapsed = timer.elapsed().as_secs_f64();

        if let Err(e @ BackupError::RunInProgress(_)) = &result {
            return self.skipped(e, elapsed).await;
        }

        let (metric, run, error) = match result {
            Ok(run) => (BackupMetric::from_run(&run), Some(run), None),
            Err(e) => {
                warn!(error = %e, "Monitored backup returned an error");
                let run = e.failed_run().cloned();
                (BackupMetric::failed(&e, elapsed, Utc::now()), run, Some(e.to_string()))
            }
        };

        metrics::record_run(
            metric.duration_seconds,
            metric.success,
            metric.successful_destinations,
            metric.total_destinations.saturating_sub(metric.successful_destinations),
        );
        self.history.record_metric(metric.clone());

        let alerts = rules::evaluate(&self.config, &metric, &self.history, Utc::now());
        for alert in &alerts {
            self.raise(alert).await;
        }

        info!(
            run_id = metric.run_id.as_deref().unwrap_or("-"),
            success = metric.success,
            duration_seconds = metric.duration_seconds,
            alerts = alerts.len(),
            "Backup run monitored"
        );

        MonitorReport {
            metric,
            alerts,
            run,
            error,
            skipped: false,
        }
    }

    /// Another run holds the lock. Nothing was attempted, so the trigger is
    /// kept out of history and the SLA rules.
    async fn skipped(&self, error: &BackupError, elapsed: f64) -> MonitorReport {
        let now = Utc::now();
        info!(error = %error, "Backup trigger skipped, another run is in progress");

        let alert = Alert::new(
            AlertLevel::Info,
            rules::TITLE_RUN_SKIPPED,
            format!("Trigger ignored: {}", error),
            now,
        )
        .with_component("backup_scheduler");
        self.raise(&alert).await;

        MonitorReport {
            metric: BackupMetric::failed(error, elapsed, now),
            alerts: vec![alert],
            run: None,
            error: Some(error.to_string()),
            skipped: true,
        }
    }

    async fn raise(&self, alert: &Alert) {
        self.history.record_alert(alert.clone());
        metrics::record_alert(alert.level.as_str());
        // The log sink cannot fail.
        let _ = self.log_sink.send(alert).await;

        if !alert.level.is_notifiable() {
            return;
        }
        for sink in &self.notification_sinks {
            match sink.send(alert).await {
                Ok(()) => debug!(sink = sink.name(), alert_id = %alert.id, "Alert delivered"),
                Err(e) => {
                    metrics::record_dispatch_failure(sink.name());
                    warn!(sink = sink.name(), alert_id = %alert.id, error = %e, "Alert delivery failed");
                }
            }
        }
    }

    /// Aggregate health of the backup system. Each sub-check degrades the
    /// verdict on its own; none of them aborts the others.
    #[instrument(skip_all)]
    pub async fn health_check(&self, provider: &dyn BackupStatusProvider) -> HealthReport {
        let now = Utc::now();
        let mut checks = Vec::with_capacity(3);

        let status = match tokio::time::timeout(self.config.health_check_timeout(), provider.backup_status()).await {
            Ok(Ok(status)) => {
                checks.push(destinations_check(&status));
                Some(status)
            }
            Ok(Err(e)) => {
                checks.push(HealthCheck::new(
                    "orchestrator",
                    CheckStatus::Fail,
                    format!("status query failed: {}", e),
                ));
                None
            }
            Err(_) => {
                checks.push(HealthCheck::new(
                    "orchestrator",
                    CheckStatus::Fail,
                    format!("status query timed out after {}s", self.config.health_check_timeout_secs),
                ));
                None
            }
        };

        let max_age = self.config.max_backup_age();
        let last_success = self.history.last_success().or_else(|| {
            status.as_ref().and_then(|s| {
                s.last_known_backups
                    .iter()
                    .filter_map(|b| b.created_at)
                    .max()
            })
        });
        checks.push(match last_success {
            Some(at) if now - at <= max_age => HealthCheck::new(
                "recent_backup",
                CheckStatus::Pass,
                format!("last successful backup at {}", at.to_rfc3339()),
            ),
            Some(at) => HealthCheck::new(
                "recent_backup",
                CheckStatus::Warn,
                format!(
                    "last successful backup at {} is older than {} hours",
                    at.to_rfc3339(),
                    self.config.max_backup_age_hours
                ),
            ),
            None => HealthCheck::new("recent_backup", CheckStatus::Warn, "no successful backup on record"),
        });

        checks.push(if self.notification_sinks.is_empty() {
            HealthCheck::new("alert_channel", CheckStatus::Warn, "no notification channel configured")
        } else {
            let names: Vec<&str> = self.notification_sinks.iter().map(|s| s.name()).collect();
            HealthCheck::new("alert_channel", CheckStatus::Pass, format!("configured: {}", names.join(", ")))
        });

        let overall = HealthStatus::from_checks(&checks);
        debug!(?overall, "Health check complete");
        HealthReport {
            overall,
            checks,
            checked_at: now,
        }
    }

    /// SLA summary over the current history
    pub fn dashboard(&self) -> DashboardSummary {
        dashboard::summarize(&self.config, &self.history.metrics(), &self.history.alerts(), Utc::now())
    }
}

fn destinations_check(status: &BackupStatus) -> HealthCheck {
    let total = status.destinations.len();
    let usable = status.destinations.iter().filter(|d| d.exists && d.writable).count();

    let check_status = if total > 0 && usable == total {
        CheckStatus::Pass
    } else if usable > 0 {
        CheckStatus::Warn
    } else {
        CheckStatus::Fail
    };
    HealthCheck::new(
        "orchestrator",
        check_status,
        format!("{} of {} destinations usable", usable, total),
    )
}
