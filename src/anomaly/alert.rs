use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::audit::AuditEvent;

/// Outbound channel for derived security violations. Fire-and-forget from
/// the core's perspective: implementations handle and log their own
/// failures.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: &AuditEvent);
}

/// POSTs the violation as JSON to a configured webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn notify(&self, alert: &AuditEvent) {
        match self.client.post(&self.url).json(alert).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(event_type = alert.event_type.as_str(), "alert delivered");
            }
            Ok(response) => {
                warn!(
                    status = %response.status(),
                    "alert webhook rejected the notification"
                );
            }
            Err(e) => {
                warn!(error = %e, "alert webhook unreachable, notification dropped");
            }
        }
    }
}

/// Discards alerts. Used when no channel is configured and in tests.
pub struct NullNotifier;

#[async_trait]
impl AlertNotifier for NullNotifier {
    async fn notify(&self, _alert: &AuditEvent) {}
}

/// Deliver off the request path; the notification outlives the scan that
/// produced it.
pub(crate) fn dispatch(notifier: Arc<dyn AlertNotifier>, alert: Arc<AuditEvent>) {
    tokio::spawn(async move {
        notifier.notify(&alert).await;
    });
}
