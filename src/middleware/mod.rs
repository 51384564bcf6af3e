//! Ordered security pipeline applied to every inbound request:
//! headers, body sanitization, injection detection, rate limiting,
//! authentication, role authorization. Stages that reject a request record
//! the corresponding audit event before returning.

pub mod auth;
pub mod authorize;
pub mod headers;
pub mod injection;
pub mod rate_limit;
pub mod sanitize;

use axum::http::{HeaderMap, Method};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::audit::Network;
use crate::ratelimit::PolicyKind;

pub use auth::{auth_middleware, CurrentUser, JwtClaims, JWT_ALGORITHM};
pub use authorize::authorize_middleware;
pub use headers::security_headers_middleware;
pub use injection::injection_detection_middleware;
pub use rate_limit::rate_limit_middleware;
pub use sanitize::sanitize_body_middleware;

/// Groups the audit events that belong to one request.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

/// Class of a route, driving which quota policy and access checks apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Health, metrics, static content: no quota, no auth.
    Public,
    /// Credential endpoints: tight quota, no auth yet.
    Login,
    /// Ordinary API surface: general quota, any authenticated role.
    Api,
    /// Admin surface: strict quota, restricted roles.
    Admin,
}

impl RouteClass {
    pub fn classify(path: &str) -> Self {
        if path == "/health" || path == "/metrics" {
            RouteClass::Public
        } else if path.starts_with("/api/auth/") {
            RouteClass::Login
        } else if path.starts_with("/admin") {
            RouteClass::Admin
        } else if path.starts_with("/api/") {
            RouteClass::Api
        } else {
            RouteClass::Public
        }
    }

    pub fn rate_policy(self) -> Option<PolicyKind> {
        match self {
            RouteClass::Public => None,
            RouteClass::Login => Some(PolicyKind::Login),
            RouteClass::Api => Some(PolicyKind::General),
            RouteClass::Admin => Some(PolicyKind::Strict),
        }
    }

    pub fn requires_auth(self) -> bool {
        matches!(self, RouteClass::Api | RouteClass::Admin)
    }

    /// Role allow-list; `None` means any authenticated role.
    pub fn allowed_roles(self) -> Option<&'static [&'static str]> {
        match self {
            RouteClass::Admin => Some(&["ADMIN", "COMPLIANCE_OFFICER"]),
            _ => None,
        }
    }
}

/// Client address, honoring reverse-proxy headers first.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|v| v.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn request_network(headers: &HeaderMap) -> Network {
    Network {
        ip_address: client_ip(headers),
        user_agent: headers
            .get("user-agent")
            .and_then(|h| h.to_str().ok())
            .map(|v| v.to_string()),
    }
}

/// CORS configuration for the embedded API surface.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ])
}
