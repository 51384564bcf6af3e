//! Configuration surface for the security core.
//!
//! Everything is environment-driven with production defaults, so the core
//! can be embedded without any mandatory setup. Malformed values fall back
//! to the default with a warning instead of failing startup: the audit path
//! must keep capturing events even when misconfigured.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::warn;

use crate::audit::AuditLevel;
use crate::ratelimit::RateLimitPolicy;

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub audit: AuditConfig,
    pub rate_limit: RateLimitSettings,
    pub anomaly: AnomalyConfig,
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Fixed capacity of the in-memory ring buffer.
    pub buffer_capacity: usize,
    /// Bound on the queue between `record` and the sink worker.
    pub sink_queue_capacity: usize,
    /// JSONL file for the durable sink; `None` disables durable forwarding.
    pub sink_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub login: RateLimitPolicy,
    pub general: RateLimitPolicy,
    pub strict: RateLimitPolicy,
    /// How often idle buckets are swept out of the table.
    pub sweep_interval: StdDuration,
}

#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub failed_login_threshold: usize,
    pub failed_login_window: Duration,
    pub source_volume_threshold: usize,
    pub source_volume_window: Duration,
    pub risk_cluster_threshold: usize,
    pub risk_cluster_min_score: u8,
    pub risk_cluster_window: Duration,
    /// Per (rule, key) suppression window between repeated violations.
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Minimum level a derived violation must reach to be pushed to the
    /// alert channel.
    pub severity_cutoff: AuditLevel,
    pub webhook_url: Option<String>,
}

impl SecurityConfig {
    pub fn from_env() -> Self {
        Self {
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "shipguard_dev_secret_change_in_production".to_string()),
            audit: AuditConfig {
                buffer_capacity: env_parse("AUDIT_BUFFER_CAPACITY", 1000),
                sink_queue_capacity: env_parse("AUDIT_SINK_QUEUE_CAPACITY", 1024),
                sink_path: env::var("AUDIT_SINK_PATH").ok().map(PathBuf::from),
            },
            rate_limit: RateLimitSettings {
                login: RateLimitPolicy {
                    points: env_parse("RATE_LIMIT_LOGIN_POINTS", 5),
                    window: Duration::seconds(env_parse("RATE_LIMIT_LOGIN_WINDOW_SECS", 900)),
                    block: Duration::seconds(env_parse("RATE_LIMIT_LOGIN_BLOCK_SECS", 1800)),
                },
                general: RateLimitPolicy {
                    points: env_parse("RATE_LIMIT_GENERAL_POINTS", 100),
                    window: Duration::seconds(env_parse("RATE_LIMIT_GENERAL_WINDOW_SECS", 60)),
                    block: Duration::seconds(env_parse("RATE_LIMIT_GENERAL_BLOCK_SECS", 60)),
                },
                strict: RateLimitPolicy {
                    points: env_parse("RATE_LIMIT_STRICT_POINTS", 10),
                    window: Duration::seconds(env_parse("RATE_LIMIT_STRICT_WINDOW_SECS", 60)),
                    block: Duration::seconds(env_parse("RATE_LIMIT_STRICT_BLOCK_SECS", 300)),
                },
                sweep_interval: StdDuration::from_secs(env_parse(
                    "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                    300,
                )),
            },
            anomaly: AnomalyConfig {
                failed_login_threshold: env_parse("ANOMALY_FAILED_LOGIN_THRESHOLD", 3),
                failed_login_window: Duration::seconds(env_parse(
                    "ANOMALY_FAILED_LOGIN_WINDOW_SECS",
                    900,
                )),
                source_volume_threshold: env_parse("ANOMALY_SOURCE_VOLUME_THRESHOLD", 20),
                source_volume_window: Duration::seconds(env_parse(
                    "ANOMALY_SOURCE_VOLUME_WINDOW_SECS",
                    600,
                )),
                risk_cluster_threshold: env_parse("ANOMALY_RISK_CLUSTER_THRESHOLD", 5),
                risk_cluster_min_score: env_parse("ANOMALY_RISK_CLUSTER_MIN_SCORE", 6),
                risk_cluster_window: Duration::seconds(env_parse(
                    "ANOMALY_RISK_CLUSTER_WINDOW_SECS",
                    1800,
                )),
                cooldown: Duration::seconds(env_parse("ANOMALY_COOLDOWN_SECS", 300)),
            },
            alerts: AlertConfig {
                severity_cutoff: env::var("ALERT_SEVERITY_CUTOFF")
                    .ok()
                    .and_then(|value| {
                        let parsed = AuditLevel::parse(&value);
                        if parsed.is_none() {
                            warn!(value = %value, "unknown ALERT_SEVERITY_CUTOFF, using 'error'");
                        }
                        parsed
                    })
                    .unwrap_or(AuditLevel::Error),
                webhook_url: env::var("ALERT_WEBHOOK_URL").ok(),
            },
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, default = %default, "unparseable env value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
