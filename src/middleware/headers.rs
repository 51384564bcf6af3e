use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use super::CorrelationId;

/// Security headers middleware. Also stamps the request with the
/// correlation id every later stage attaches to its audit events.
pub async fn security_headers_middleware(
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let correlation = CorrelationId(Uuid::new_v4());
    request.extensions_mut().insert(correlation);
    let path = request.uri().path().to_string();

    let mut response = next.run(request).await;

    let headers = response.headers_mut();

    // Core security headers
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );

    headers.insert(
        HeaderName::from_static("x-xss-protection"),
        HeaderValue::from_static("1; mode=block"),
    );

    headers.insert(
        HeaderName::from_static("strict-transport-security"),
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );

    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self'; object-src 'none'; frame-src 'none';",
        ),
    );

    // Responses from the auth and audit surfaces must never be cached
    if path.starts_with("/admin") || path.contains("/auth/") {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
    }

    if let Ok(value) = HeaderValue::from_str(&correlation.0.to_string()) {
        headers.insert(HeaderName::from_static("x-request-id"), value);
    }

    Ok(response)
}
