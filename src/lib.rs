use axum::{extract::DefaultBodyLimit, middleware as axum_middleware, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod anomaly;
pub mod api;
pub mod audit;
pub mod config;
pub mod middleware;
pub mod observability;
pub mod ratelimit;
pub mod state;

use middleware::{
    auth_middleware, authorize_middleware, cors_layer, injection_detection_middleware,
    rate_limit_middleware, sanitize_body_middleware, security_headers_middleware,
};
use observability::{metrics_middleware, monitoring_router};
use state::AppState;

/// Upper bound on bodies buffered for sanitization and injection scanning.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Wrap the host application's routes with the security pipeline.
///
/// Layer order is the pipeline order: security headers run first, then
/// body sanitization, injection detection, rate limiting, authentication
/// and role authorization, before a request reaches any handler. The
/// monitoring and admin-audit routers are mounted alongside the host
/// routes.
pub fn create_app_router(app_state: Arc<AppState>, app_routes: Router<Arc<AppState>>) -> Router {
    Router::new()
        .merge(monitoring_router())
        .merge(api::audit_router())
        .merge(app_routes)
        .with_state(app_state.clone())
        // Middlewares that require state, applied after .with_state()
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            authorize_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            app_state,
            injection_detection_middleware,
        ))
        .layer(axum_middleware::from_fn(sanitize_body_middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        // Stateless middlewares
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(axum_middleware::from_fn(security_headers_middleware))
}
