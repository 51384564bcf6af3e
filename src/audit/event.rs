use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Severity tier of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
    Critical,
}

impl AuditLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditLevel::Info => "info",
            AuditLevel::Warn => "warn",
            AuditLevel::Error => "error",
            AuditLevel::Critical => "critical",
        }
    }

    /// Parse a config value like "warn". Unknown values return None.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "info" => Some(AuditLevel::Info),
            "warn" | "warning" => Some(AuditLevel::Warn),
            "error" => Some(AuditLevel::Error),
            "critical" => Some(AuditLevel::Critical),
            _ => None,
        }
    }
}

/// Closed enumeration of security-relevant occurrences.
///
/// `Other` is the catch-all for kinds the host application emits that the
/// core does not classify; those are still recorded, at the minimum risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    LoginSuccess,
    LoginFailed,
    Logout,
    TokenRejected,
    PermissionGranted,
    AccessDenied,
    DataAccess,
    DataExport,
    RateLimitExceeded,
    SuspiciousActivity,
    SecurityViolation,
    Other,
}

impl AuditEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::LoginSuccess => "login_success",
            AuditEventType::LoginFailed => "login_failed",
            AuditEventType::Logout => "logout",
            AuditEventType::TokenRejected => "token_rejected",
            AuditEventType::PermissionGranted => "permission_granted",
            AuditEventType::AccessDenied => "access_denied",
            AuditEventType::DataAccess => "data_access",
            AuditEventType::DataExport => "data_export",
            AuditEventType::RateLimitExceeded => "rate_limit_exceeded",
            AuditEventType::SuspiciousActivity => "suspicious_activity",
            AuditEventType::SecurityViolation => "security_violation",
            AuditEventType::Other => "other",
        }
    }

    /// Static risk score lookup, 1-10. Pure: the same type always maps to
    /// the same score. This table is the single source of truth for both
    /// the audit log and the anomaly detector thresholds.
    pub fn risk_score(self) -> u8 {
        match self {
            AuditEventType::LoginSuccess => 1,
            AuditEventType::Logout => 1,
            AuditEventType::PermissionGranted => 1,
            AuditEventType::DataAccess => 2,
            AuditEventType::RateLimitExceeded => 4,
            AuditEventType::LoginFailed => 5,
            AuditEventType::TokenRejected => 5,
            AuditEventType::AccessDenied => 6,
            AuditEventType::DataExport => 6,
            AuditEventType::SuspiciousActivity => 8,
            AuditEventType::SecurityViolation => 9,
            AuditEventType::Other => 1,
        }
    }

    /// Parse the wire name of a kind, e.g. from an export filter.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "login_success" => Some(AuditEventType::LoginSuccess),
            "login_failed" => Some(AuditEventType::LoginFailed),
            "logout" => Some(AuditEventType::Logout),
            "token_rejected" => Some(AuditEventType::TokenRejected),
            "permission_granted" => Some(AuditEventType::PermissionGranted),
            "access_denied" => Some(AuditEventType::AccessDenied),
            "data_access" => Some(AuditEventType::DataAccess),
            "data_export" => Some(AuditEventType::DataExport),
            "rate_limit_exceeded" => Some(AuditEventType::RateLimitExceeded),
            "suspicious_activity" => Some(AuditEventType::SuspiciousActivity),
            "security_violation" => Some(AuditEventType::SecurityViolation),
            "other" => Some(AuditEventType::Other),
            _ => None,
        }
    }

    /// Derived event kinds are produced by the anomaly detector, never by
    /// request handling directly. They must not re-trigger detection.
    pub fn is_derived(self) -> bool {
        matches!(
            self,
            AuditEventType::SecurityViolation | AuditEventType::SuspiciousActivity
        )
    }
}

/// Outcome of the audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    Error,
}

/// Verified identity claims attached to an event. Absent for
/// unauthenticated traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub user_email: String,
    pub user_role: String,
}

/// Network origin of the request that produced the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// What was acted upon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub resource_type: String,
    pub resource_id: String,
}

/// One immutable record of a security-relevant occurrence.
///
/// Events are only ever appended; the timestamp and risk score are stamped
/// once by the log at record time and never change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
    pub action: String,
    pub result: AuditOutcome,
    pub details: Map<String, Value>,
    pub risk_score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl AuditEvent {
    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.user_id.as_str())
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.network.as_ref().map(|n| n.ip_address.as_str())
    }
}

/// The partial record a caller hands to [`crate::audit::AuditLog::record`].
/// Timestamp and risk score are filled in by the log.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub level: AuditLevel,
    pub event_type: AuditEventType,
    pub identity: Option<Identity>,
    pub network: Option<Network>,
    pub resource: Option<Resource>,
    pub action: String,
    pub result: AuditOutcome,
    pub details: Map<String, Value>,
    pub correlation_id: Option<Uuid>,
}

impl NewAuditEvent {
    pub fn new(event_type: AuditEventType, action: impl Into<String>) -> Self {
        Self {
            level: AuditLevel::Info,
            event_type,
            identity: None,
            network: None,
            resource: None,
            action: action.into(),
            result: AuditOutcome::Success,
            details: Map::new(),
            correlation_id: None,
        }
    }

    pub fn level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.resource = Some(Resource {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        });
        self
    }

    pub fn result(mut self, result: AuditOutcome) -> Self {
        self.result = result;
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub(crate) fn into_event(self, timestamp: DateTime<Utc>) -> AuditEvent {
        AuditEvent {
            timestamp,
            level: self.level,
            event_type: self.event_type,
            identity: self.identity,
            network: self.network,
            resource: self.resource,
            action: self.action,
            result: self.result,
            details: self.details,
            risk_score: self.event_type.risk_score(),
            correlation_id: self.correlation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [AuditEventType; 12] = [
        AuditEventType::LoginSuccess,
        AuditEventType::LoginFailed,
        AuditEventType::Logout,
        AuditEventType::TokenRejected,
        AuditEventType::PermissionGranted,
        AuditEventType::AccessDenied,
        AuditEventType::DataAccess,
        AuditEventType::DataExport,
        AuditEventType::RateLimitExceeded,
        AuditEventType::SuspiciousActivity,
        AuditEventType::SecurityViolation,
        AuditEventType::Other,
    ];

    #[test]
    fn test_risk_score_is_deterministic_and_bounded() {
        for event_type in ALL_TYPES {
            let first = event_type.risk_score();
            let second = event_type.risk_score();
            assert_eq!(first, second, "score must be stable for {:?}", event_type);
            assert!((1..=10).contains(&first), "score out of range for {:?}", event_type);
        }
    }

    #[test]
    fn test_unclassified_kind_gets_minimum_risk() {
        assert_eq!(AuditEventType::Other.risk_score(), 1);
    }

    #[test]
    fn test_event_type_serializes_snake_case() {
        let json = serde_json::to_string(&AuditEventType::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"rate_limit_exceeded\"");
        let json = serde_json::to_string(&AuditEventType::LoginFailed).unwrap();
        assert_eq!(json, "\"login_failed\"");
    }

    #[test]
    fn test_level_ordering_matches_severity() {
        assert!(AuditLevel::Info < AuditLevel::Warn);
        assert!(AuditLevel::Warn < AuditLevel::Error);
        assert!(AuditLevel::Error < AuditLevel::Critical);
    }

    #[test]
    fn test_into_event_stamps_score_and_timestamp() {
        let now = Utc::now();
        let event = NewAuditEvent::new(AuditEventType::AccessDenied, "role check failed")
            .level(AuditLevel::Warn)
            .result(AuditOutcome::Failure)
            .detail("required", "ADMIN")
            .into_event(now);

        assert_eq!(event.timestamp, now);
        assert_eq!(event.risk_score, 6);
        assert_eq!(event.level, AuditLevel::Warn);
        assert_eq!(event.details.get("required").unwrap(), "ADMIN");
    }
}
