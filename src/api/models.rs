use serde::Serialize;

/// Generic error body for rejected requests.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Input rejected by sanitization or injection detection.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationErrorResponse {
    pub error: String,
    pub details: Vec<String>,
}

/// Quota exhausted; `retry_after` mirrors the `Retry-After` header.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitErrorResponse {
    pub error: String,
    pub message: String,
    pub retry_after: u64,
}

/// Authenticated but not authorized for the route.
#[derive(Debug, Clone, Serialize)]
pub struct RoleErrorResponse {
    pub error: String,
    pub required: Vec<String>,
    pub current: String,
}
