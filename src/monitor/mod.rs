//! Backup monitoring
//!
//! [`BackupMonitor`] wraps backup runs, records a [`BackupMetric`] per run in a
//! [`MonitorHistory`], evaluates threshold rules and routes the resulting
//! alerts through [`AlertSink`]s. It also answers health checks and builds the
//! SLA dashboard.

pub mod dashboard;
pub mod history;
pub mod metrics;
#[allow(clippy::module_inception)]
pub mod monitor;
pub mod rules;
pub mod sinks;
pub mod types;

pub use dashboard::{summarize, DashboardSummary, WindowSummary};
pub use history::MonitorHistory;
pub use metrics::gather_metrics;
pub use monitor::BackupMonitor;
pub use sinks::{AlertDispatchError, AlertSink, EmailAlertSink, EmailMessage, LogAlertSink, MailTransport};
pub use types::{
    Alert, AlertLevel, BackupMetric, CheckStatus, HealthCheck, HealthReport, HealthStatus,
    MonitorReport,
};
