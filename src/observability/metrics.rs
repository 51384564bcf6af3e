// ============================================================================
// PROMETHEUS METRICS
// ============================================================================
// Counters for the security core, scraped via /metrics
// ============================================================================

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    /// Total HTTP requests by method, endpoint and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    /// Audit events recorded, by type and level
    pub static ref SECURITY_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "security_events_total",
        "Total number of recorded security events",
        &["event_type", "level"]
    )
    .unwrap();

    /// Consumptions rejected by the rate limiter, per policy
    pub static ref RATE_LIMITED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rate_limited_total",
        "Total number of rate-limited requests",
        &["policy"]
    )
    .unwrap();

    /// Violations emitted by the anomaly detector, per rule
    pub static ref ANOMALY_ALERTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "anomaly_alerts_total",
        "Total number of anomaly rule firings",
        &["rule"]
    )
    .unwrap();
}

/// Helper to register one HTTP request
pub fn record_http_request(method: &str, endpoint: &str, status: u16) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();
}

/// Helper to register one recorded audit event
pub fn record_security_event(event_type: &str, level: &str) {
    SECURITY_EVENTS_TOTAL
        .with_label_values(&[event_type, level])
        .inc();
}

/// Helper to register one rate-limit rejection
pub fn record_rate_limited(policy: &str) {
    RATE_LIMITED_TOTAL.with_label_values(&[policy]).inc();
}

/// Helper to register one anomaly rule firing
pub fn record_anomaly(rule: &str) {
    ANOMALY_ALERTS_TOTAL.with_label_values(&[rule]).inc();
}
