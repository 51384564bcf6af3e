use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use std::sync::Arc;
use tracing::warn;

use crate::api::models::RoleErrorResponse;
use crate::audit::{AuditEventType, AuditLevel, AuditOutcome, NewAuditEvent};
use crate::state::AppState;

use super::{request_network, CorrelationId, CurrentUser, RouteClass};

/// Compare the authenticated role against the route's allow-list. Runs
/// after authentication; a mismatch records `access_denied` carrying both
/// the required and the actual role.
pub async fn authorize_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<RoleErrorResponse>)> {
    let class = RouteClass::classify(request.uri().path());
    let Some(allowed) = class.allowed_roles() else {
        return Ok(next.run(request).await);
    };

    let required: Vec<String> = allowed.iter().map(|role| role.to_string()).collect();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let network = request_network(request.headers());
    let correlation = request.extensions().get::<CorrelationId>().copied();

    let Some(user) = request.extensions().get::<CurrentUser>().cloned() else {
        return Err((
            StatusCode::FORBIDDEN,
            Json(RoleErrorResponse {
                error: "forbidden".to_string(),
                required,
                current: String::new(),
            }),
        ));
    };

    if allowed.contains(&user.role.as_str()) {
        return Ok(next.run(request).await);
    }

    warn!(
        user_id = %user.user_id,
        role = %user.role,
        path = %path,
        "🚫 role not allowed for route"
    );

    let mut denied = NewAuditEvent::new(AuditEventType::AccessDenied, "role check failed")
        .level(AuditLevel::Warn)
        .result(AuditOutcome::Failure)
        .identity(user.identity())
        .network(network)
        .detail("required", required.clone())
        .detail("current", user.role.clone())
        .detail("path", path)
        .detail("method", method);
    if let Some(CorrelationId(id)) = correlation {
        denied = denied.correlation_id(id);
    }
    state.audit.record(denied);

    Err((
        StatusCode::FORBIDDEN,
        Json(RoleErrorResponse {
            error: "forbidden".to_string(),
            required,
            current: user.role,
        }),
    ))
}
