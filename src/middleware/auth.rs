use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::models::ErrorResponse;
use crate::audit::{
    AuditEventType, AuditLevel, AuditOutcome, Identity, Network, NewAuditEvent,
};
use crate::state::AppState;

use super::{request_network, CorrelationId, RouteClass};

/// JWT claims issued by the identity provider.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String, // user id
    pub email: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: Option<String>,
}

/// Verified identity attached to the request for handlers and the
/// authorization stage.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: String,
    pub email: String,
    pub role: String,
}

impl CurrentUser {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id.clone(),
            user_email: self.email.clone(),
            user_role: self.role.clone(),
        }
    }
}

pub const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

/// Validate a bearer token and return its claims.
pub fn verify_token(token: &str, secret: &str) -> Result<JwtClaims, jsonwebtoken::errors::Error> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(JWT_ALGORITHM);
    decode::<JwtClaims>(token, &decoding_key, &validation).map(|data| data.claims)
}

/// Require a valid bearer credential on protected route classes.
///
/// Rejections record `access_denied` before the 401 leaves; a success
/// records one `permission_granted` info event per authenticated request,
/// which also feeds the baseline-traffic anomaly signal.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let class = RouteClass::classify(request.uri().path());
    if !class.requires_auth() {
        return Ok(next.run(request).await);
    }

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let network = request_network(request.headers());
    let correlation = request.extensions().get::<CorrelationId>().copied();

    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    let Some(token) = bearer else {
        warn!(path = %path, ip = %network.ip_address, "Missing Authorization header");
        record_denied(&state, "missing_token", &network, correlation, &path, &method);
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Missing Authorization header".to_string(),
                message: "Authentication required. Please provide a valid Bearer token."
                    .to_string(),
                details: None,
            }),
        ));
    };

    match verify_token(&token, &state.config.jwt_secret) {
        Ok(claims) => {
            let user = CurrentUser {
                user_id: claims.sub,
                email: claims.email,
                role: claims.role,
            };

            info!(
                user_id = %user.user_id,
                email = %user.email,
                "🔐 JWT authentication successful"
            );

            let mut granted = NewAuditEvent::new(
                AuditEventType::PermissionGranted,
                "authenticated api request",
            )
            .identity(user.identity())
            .network(network)
            .detail("path", path)
            .detail("method", method);
            if let Some(CorrelationId(id)) = correlation {
                granted = granted.correlation_id(id);
            }
            state.audit.record(granted);

            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Err(e) => {
            let reason = match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => "expired_token",
                _ => "invalid_token",
            };
            warn!(path = %path, reason, "JWT validation failed: {}", e);
            record_denied(&state, reason, &network, correlation, &path, &method);

            let message = if reason == "expired_token" {
                "Your session has expired. Please log in again."
            } else {
                "Could not validate credentials. Please log in again."
            };
            Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or expired token".to_string(),
                    message: message.to_string(),
                    details: None,
                }),
            ))
        }
    }
}

fn record_denied(
    state: &AppState,
    reason: &str,
    network: &Network,
    correlation: Option<CorrelationId>,
    path: &str,
    method: &str,
) {
    let mut denied = NewAuditEvent::new(AuditEventType::AccessDenied, "unauthenticated request")
        .level(AuditLevel::Warn)
        .result(AuditOutcome::Failure)
        .network(network.clone())
        .detail("reason", reason)
        .detail("path", path)
        .detail("method", method);
    if let Some(CorrelationId(id)) = correlation {
        denied = denied.correlation_id(id);
    }
    state.audit.record(denied);
}
