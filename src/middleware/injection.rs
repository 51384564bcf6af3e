use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::warn;

use crate::api::models::ValidationErrorResponse;
use crate::audit::{AuditEventType, AuditLevel, AuditOutcome, NewAuditEvent};
use crate::state::AppState;

use super::{request_network, CorrelationId};

static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();

/// Blocklist of SQL keyword/operator shapes. Heuristic by nature: it can
/// both over- and under-match, and it is a defense-in-depth layer on top of
/// parameterized queries, not a substitute for them.
fn injection_patterns() -> &'static [(&'static str, Regex)] {
    PATTERNS.get_or_init(|| {
        vec![
            (
                "sql_statement",
                Regex::new(
                    r"(?i)\b(union\s+(all\s+)?select|select\s+.+\s+from|insert\s+into|delete\s+from|drop\s+(table|database)|truncate\s+table|alter\s+table)\b",
                )
                .unwrap(),
            ),
            (
                "sql_execution",
                Regex::new(r"(?i)\b(exec(ute)?\s+\w|xp_cmdshell|information_schema)\b").unwrap(),
            ),
            (
                "boolean_tautology",
                Regex::new(r#"(?i)['"]?\s*\b(or|and)\b\s+['"]?\d+['"]?\s*=\s*['"]?\d+"#).unwrap(),
            ),
            (
                "quoted_comparison",
                Regex::new(r"(?i)'\s*\b(or|and)\b\s+'[^']*'\s*=\s*'").unwrap(),
            ),
            ("comment_terminator", Regex::new(r"(;\s*--|--\s*$|/\*.*\*/)").unwrap()),
        ]
    })
}

/// First pattern that matches, if any.
pub fn find_injection(text: &str) -> Option<&'static str> {
    injection_patterns()
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(name, _)| *name)
}

/// Scan query parameters and body for injection shapes; a match records a
/// `security_violation` and rejects the request before it reaches a handler.
pub async fn injection_detection_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ValidationErrorResponse>)> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    let network = request_network(request.headers());
    let correlation = request.extensions().get::<CorrelationId>().copied();

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, crate::MAX_BODY_BYTES)
        .await
        .map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(ValidationErrorResponse {
                    error: "unreadable_body".to_string(),
                    details: vec!["request body could not be read".to_string()],
                }),
            )
        })?;

    let mut findings: Vec<(&'static str, &'static str)> = Vec::new();
    if let Some(pattern) = find_injection(&query) {
        findings.push(("query", pattern));
    }
    if !bytes.is_empty() {
        if let Ok(text) = std::str::from_utf8(&bytes) {
            if let Some(pattern) = find_injection(text) {
                findings.push(("body", pattern));
            }
        }
    }

    if !findings.is_empty() {
        warn!(
            method = %method,
            path = %path,
            ip = %network.ip_address,
            "🚨 suspected injection payload blocked"
        );

        let mut violation = NewAuditEvent::new(
            AuditEventType::SecurityViolation,
            "blocked request with suspected injection payload",
        )
        .level(AuditLevel::Error)
        .result(AuditOutcome::Failure)
        .network(network)
        .detail("path", path.clone())
        .detail("method", method.clone())
        .detail(
            "matches",
            findings
                .iter()
                .map(|(location, pattern)| format!("{location}:{pattern}"))
                .collect::<Vec<_>>(),
        );
        if let Some(CorrelationId(id)) = correlation {
            violation = violation.correlation_id(id);
        }
        state.audit.record(violation);

        return Err((
            StatusCode::BAD_REQUEST,
            Json(ValidationErrorResponse {
                error: "invalid_input".to_string(),
                details: findings
                    .iter()
                    .map(|(location, pattern)| {
                        format!("suspicious {pattern} pattern in request {location}")
                    })
                    .collect(),
            }),
        ));
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_classic_injection_payloads() {
        assert!(find_injection("'; DROP TABLE users; --").is_some());
        assert!(find_injection("1 UNION SELECT password FROM users").is_some());
        assert!(find_injection("id=1 OR 1=1").is_some());
        assert!(find_injection("name=' or 'a'='a").is_some());
        assert!(find_injection("q=test' ; -- comment").is_some());
    }

    #[test]
    fn test_ordinary_text_passes() {
        assert!(find_injection("dangerous goods manifest for truck 17").is_none());
        assert!(find_injection("select the nearest depot").is_none());
        assert!(find_injection("status=DELIVERED&page=2").is_none());
    }
}
