use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::audit::{
    export_csv, AuditEvent, AuditEventType, AuditQuery, NewAuditEvent,
};
use crate::middleware::{CorrelationId, CurrentUser};
use crate::state::AppState;

use super::models::ValidationErrorResponse;

/// Admin surface over the in-memory audit buffer: recent-window inspection
/// and compliance CSV export. Mounted under `/admin`, so the strict quota
/// and the admin role allow-list apply.
pub fn audit_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/audit/events", get(recent_events))
        .route("/admin/audit/export", get(export_events))
}

#[derive(Debug, Deserialize)]
pub struct EventsParams {
    pub limit: Option<usize>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub event_type: Option<String>,
}

async fn recent_events(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    correlation: Option<Extension<CorrelationId>>,
    Query(params): Query<EventsParams>,
) -> Result<Json<Vec<AuditEvent>>, (StatusCode, Json<ValidationErrorResponse>)> {
    let event_types = match params.event_type.as_deref() {
        Some(raw) => Some(parse_event_types(raw)?),
        None => None,
    };

    let events = state.audit.query(&AuditQuery {
        event_types,
        user_id: params.user_id,
        ip_address: params.ip_address,
        limit: Some(params.limit.unwrap_or(100)),
        ..AuditQuery::default()
    });

    let mut access = NewAuditEvent::new(AuditEventType::DataAccess, "viewed recent audit events")
        .identity(user.identity())
        .resource("audit_log", "recent")
        .detail("returned", events.len());
    if let Some(Extension(CorrelationId(id))) = correlation {
        access = access.correlation_id(id);
    }
    state.audit.record(access);

    Ok(Json(events.iter().map(|event| (**event).clone()).collect()))
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub event_types: Option<String>,
}

async fn export_events(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    correlation: Option<Extension<CorrelationId>>,
    Query(params): Query<ExportParams>,
) -> Result<Response, (StatusCode, Json<ValidationErrorResponse>)> {
    let end = params.end.unwrap_or_else(Utc::now);
    let start = params.start.unwrap_or(end - Duration::hours(24));
    let event_types = match params.event_types.as_deref() {
        Some(raw) => Some(parse_event_types(raw)?),
        None => None,
    };

    let csv = export_csv(&state.audit, start, end, event_types.as_deref());
    let rows = csv.lines().count().saturating_sub(1);

    info!(user_id = %user.user_id, rows, "📄 audit export generated");

    let mut export = NewAuditEvent::new(AuditEventType::DataExport, "exported audit events as csv")
        .identity(user.identity())
        .resource("audit_log", "csv")
        .detail("start", start.to_rfc3339())
        .detail("end", end.to_rfc3339())
        .detail("rows", rows);
    if let Some(Extension(CorrelationId(id))) = correlation {
        export = export.correlation_id(id);
    }
    state.audit.record(export);

    let mut response = (StatusCode::OK, csv).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/csv; charset=utf-8"),
    );
    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"audit_export.csv\""),
    );
    Ok(response)
}

fn parse_event_types(
    raw: &str,
) -> Result<Vec<AuditEventType>, (StatusCode, Json<ValidationErrorResponse>)> {
    let mut types = Vec::new();
    let mut unknown = Vec::new();
    for name in raw.split(',').filter(|name| !name.trim().is_empty()) {
        match AuditEventType::parse(name) {
            Some(event_type) => types.push(event_type),
            None => unknown.push(name.trim().to_string()),
        }
    }
    if !unknown.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ValidationErrorResponse {
                error: "unknown_event_type".to_string(),
                details: unknown,
            }),
        ));
    }
    Ok(types)
}
