//! Alert delivery channels

use super::types::{Alert, AlertLevel};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AlertDispatchError {
    #[error("Sink '{sink}' is not configured: {reason}")]
    NotConfigured { sink: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

/// A destination for alerts. New channels implement this without touching
/// the rule evaluation.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert) -> Result<(), AlertDispatchError>;
}

/// Writes every alert to the tracing log at a matching level
#[derive(Debug, Clone, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertDispatchError> {
        match alert.level {
            AlertLevel::Info => info!(
                alert_id = %alert.id,
                level = %alert.level,
                component = %alert.component,
                title = %alert.title,
                "{}",
                alert.message
            ),
            AlertLevel::Warning => warn!(
                alert_id = %alert.id,
                level = %alert.level,
                component = %alert.component,
                title = %alert.title,
                "{}",
                alert.message
            ),
            AlertLevel::Error | AlertLevel::Critical => error!(
                alert_id = %alert.id,
                level = %alert.level,
                component = %alert.component,
                title = %alert.title,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Mail delivery used by [`EmailAlertSink`]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, message: EmailMessage) -> Result<(), AlertDispatchError>;
}

/// Emails alerts to a fixed recipient list
pub struct EmailAlertSink {
    transport: Arc<dyn MailTransport>,
    from: String,
    recipients: Vec<String>,
}

impl EmailAlertSink {
    pub fn new(transport: Arc<dyn MailTransport>, from: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            transport,
            from: from.into(),
            recipients,
        }
    }

    pub fn compose(&self, alert: &Alert) -> EmailMessage {
        let mut body = format!(
            "{}\n\nLevel: {}\nComponent: {}\nTime: {}\nAlert ID: {}\n",
            alert.message,
            alert.level,
            alert.component,
            alert.timestamp.to_rfc3339(),
            alert.id
        );
        if !alert.details.is_empty() {
            body.push_str("\nDetails:\n");
            for (key, value) in &alert.details {
                body.push_str(&format!("  {}: {}\n", key, value));
            }
        }

        EmailMessage {
            from: self.from.clone(),
            to: self.recipients.clone(),
            subject: format!("[RTM Backup {}] {}", alert.level.as_str().to_uppercase(), alert.title),
            body,
        }
    }
}

#[async_trait]
impl AlertSink for EmailAlertSink {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertDispatchError> {
        if self.recipients.is_empty() {
            return Err(AlertDispatchError::NotConfigured {
                sink: self.name().to_string(),
                reason: "no recipients".to_string(),
            });
        }
        self.transport.deliver(self.compose(alert)).await
    }
}
