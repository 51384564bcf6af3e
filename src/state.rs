use std::sync::Arc;

use tracing::info;

use crate::anomaly::{AlertNotifier, AnomalyDetector, NullNotifier, WebhookNotifier};
use crate::audit::{AuditLog, AuditSink, JsonlFileSink, NullSink};
use crate::config::SecurityConfig;
use crate::ratelimit::RateLimiter;

/// Shared state of the security core. Explicitly owned and injected into
/// the middleware chain at construction, so tests get isolated instances
/// instead of ambient singletons.
pub struct AppState {
    pub config: SecurityConfig,
    pub audit: Arc<AuditLog>,
    pub limiter: Arc<RateLimiter>,
    pub detector: Arc<AnomalyDetector>,
}

impl AppState {
    /// Wire the full core: log, sink worker, detector, limiter and its
    /// sweeper. Spawns background tasks, so it must run inside the runtime.
    pub fn new(config: SecurityConfig) -> anyhow::Result<Self> {
        let sink: Arc<dyn AuditSink> = match &config.audit.sink_path {
            Some(path) => {
                info!(path = %path.display(), "durable audit sink: jsonl file");
                Arc::new(JsonlFileSink::new(path.clone()))
            }
            None => {
                info!("no AUDIT_SINK_PATH configured, durable forwarding disabled");
                Arc::new(NullSink)
            }
        };
        let audit = AuditLog::new(&config.audit, sink);

        let notifier: Arc<dyn AlertNotifier> = match &config.alerts.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
            None => Arc::new(NullNotifier),
        };
        let detector = AnomalyDetector::new(
            config.anomaly.clone(),
            audit.clone(),
            notifier,
            config.alerts.severity_cutoff,
        );
        audit.set_observer(&detector);

        let limiter = RateLimiter::new(&config.rate_limit, audit.clone());
        limiter.spawn_sweeper(config.rate_limit.sweep_interval);

        Ok(Self {
            config,
            audit,
            limiter,
            detector,
        })
    }
}
