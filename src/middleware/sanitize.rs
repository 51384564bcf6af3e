use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::api::models::ErrorResponse;

static SCRIPT_TAG_RE: OnceLock<Regex> = OnceLock::new();
static JS_URL_RE: OnceLock<Regex> = OnceLock::new();
static EVENT_HANDLER_RE: OnceLock<Regex> = OnceLock::new();

fn script_tag_re() -> &'static Regex {
    SCRIPT_TAG_RE.get_or_init(|| {
        Regex::new(r"(?is)<script[^>]*>.*?</script\s*>|<script[^>]*/?>").unwrap()
    })
}

fn js_url_re() -> &'static Regex {
    JS_URL_RE.get_or_init(|| Regex::new(r"(?i)javascript\s*:").unwrap())
}

fn event_handler_re() -> &'static Regex {
    EVENT_HANDLER_RE.get_or_init(|| Regex::new(r#"(?i)\bon\w+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).unwrap())
}

/// Strip script tags, `javascript:` URLs and inline event handlers from a
/// string. Blocklist scrubbing is a defense-in-depth layer, not a
/// replacement for output encoding at render time.
pub fn sanitize_fragment(input: &str) -> String {
    let cleaned = script_tag_re().replace_all(input, "");
    let cleaned = js_url_re().replace_all(&cleaned, "");
    event_handler_re().replace_all(&cleaned, "").to_string()
}

fn sanitize_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            let cleaned = sanitize_fragment(s);
            if cleaned != *s {
                debug!("scrubbed markup from request body field");
                *s = cleaned;
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                sanitize_value(item);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                sanitize_value(item);
            }
        }
        _ => {}
    }
}

/// Rewrite string fields of a JSON request body in place. Non-JSON bodies
/// pass through untouched; this stage never rejects.
pub async fn sanitize_body_middleware(
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let (mut parts, body) = request.into_parts();

    let bytes = axum::body::to_bytes(body, crate::MAX_BODY_BYTES)
        .await
        .map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "unreadable_body".to_string(),
                    message: "Request body could not be read.".to_string(),
                    details: None,
                }),
            )
        })?;

    let bytes = if bytes.is_empty() {
        bytes
    } else {
        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(mut value) => {
                sanitize_value(&mut value);
                match serde_json::to_vec(&value) {
                    Ok(cleaned) => Bytes::from(cleaned),
                    Err(_) => bytes,
                }
            }
            Err(_) => bytes,
        }
    };

    if let Ok(len) = HeaderValue::from_str(&bytes.len().to_string()) {
        parts.headers.insert(header::CONTENT_LENGTH, len);
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_script_tags() {
        let input = "hello <script>alert('x')</script> world";
        assert_eq!(sanitize_fragment(input), "hello  world");
    }

    #[test]
    fn test_strips_javascript_urls() {
        let input = "click javascript:alert(1) here";
        assert_eq!(sanitize_fragment(input), "click alert(1) here");
    }

    #[test]
    fn test_strips_inline_event_handlers() {
        let input = r#"<img src="x" onerror="alert(1)">"#;
        let cleaned = sanitize_fragment(input);
        assert!(!cleaned.to_lowercase().contains("onerror"));
    }

    #[test]
    fn test_plain_text_is_untouched() {
        let input = "shipment SS-1042 delivered on time";
        assert_eq!(sanitize_fragment(input), input);
    }

    #[test]
    fn test_sanitize_value_recurses_into_nested_fields() {
        let mut value = serde_json::json!({
            "note": "<script>steal()</script>ok",
            "tags": ["clean", "javascript:bad()"],
            "nested": { "html": "<b onclick=run()>x</b>" }
        });
        sanitize_value(&mut value);

        assert_eq!(value["note"], "ok");
        assert_eq!(value["tags"][1], "bad()");
        assert!(!value["nested"]["html"].as_str().unwrap().contains("onclick"));
    }
}
