use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::api::models::RateLimitErrorResponse;
use crate::ratelimit::RateLimitDecision;
use crate::state::AppState;

use super::{client_ip, RouteClass};

/// Enforce the route class's quota, keyed by client address. The limiter
/// records the `rate_limit_exceeded` audit event itself, so a rejection is
/// already logged by the time the 429 is built.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let class = RouteClass::classify(request.uri().path());
    let Some(policy) = class.rate_policy() else {
        return next.run(request).await;
    };

    let key = client_ip(request.headers());
    match state.limiter.consume(policy, &key) {
        RateLimitDecision::Allowed { .. } => next.run(request).await,
        RateLimitDecision::Rejected { retry_after_secs } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(RateLimitErrorResponse {
                    error: "rate_limit_exceeded".to_string(),
                    message: format!(
                        "Too many requests under the {} policy. Try again later.",
                        policy.as_str()
                    ),
                    retry_after: retry_after_secs,
                }),
            )
                .into_response();

            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}
