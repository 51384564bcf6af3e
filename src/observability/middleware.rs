use axum::{extract::Request, middleware::Next, response::Response};

use crate::observability::record_http_request;

/// Middleware that records request metrics for every HTTP request
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    record_http_request(&method, &path, response.status().as_u16());
    response
}

/// Normalize paths so dynamic segments do not explode label cardinality
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            let looks_like_uuid = segment.len() == 36 && segment.chars().filter(|c| *c == '-').count() == 4;
            let looks_like_id = !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit());
            if looks_like_uuid || looks_like_id {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_collapses_ids() {
        assert_eq!(normalize_path("/api/shipments/12345"), "/api/shipments/:id");
        assert_eq!(
            normalize_path("/api/shipments/550e8400-e29b-41d4-a716-446655440000/events"),
            "/api/shipments/:id/events"
        );
        assert_eq!(normalize_path("/admin/audit/export"), "/admin/audit/export");
    }
}
