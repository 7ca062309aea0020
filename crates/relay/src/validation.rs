// Input validation helpers.
//
// - `ValidatedJson<T>` extractor: content-type check + serde, structured errors.
// - WebSocket frame size limit.
// - Field rules for group and chat payloads.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::{ErrorCode, RelayError};

/// Maximum WebSocket text frame payload in bytes (64 KiB).
pub const MAX_WS_FRAME_BYTES: usize = 64 * 1024;

pub const MAX_GROUP_NAME_CHARS: usize = 100;
pub const MAX_GROUP_DESCRIPTION_CHARS: usize = 500;
pub const DEFAULT_MAX_MEMBERS: u32 = 50;
pub const MIN_MAX_MEMBERS: u32 = 2;
pub const MAX_MAX_MEMBERS: u32 = 500;
pub const MAX_CHAT_MESSAGE_CHARS: usize = 1_000;
pub const MAX_NOTIFICATION_CONTENT_CHARS: usize = 500;

// ── ValidatedJson extractor ────────────────────────────────────────

/// A JSON body extractor that returns structured `RelayError` on failure.
///
/// Use this instead of `axum::Json<T>` in handlers to get consistent
/// VALIDATION_FAILED error responses instead of plain-text Axum rejections.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => {
                let (message, details) = classify_json_rejection(&rejection);
                Err(RelayError::new(ErrorCode::ValidationFailed, message)
                    .with_details(details)
                    .into_response())
            }
        }
    }
}

fn classify_json_rejection(rejection: &JsonRejection) -> (String, serde_json::Value) {
    match rejection {
        JsonRejection::JsonDataError(e) => {
            (format!("invalid JSON payload: {e}"), json!({ "kind": "data_error" }))
        }
        JsonRejection::JsonSyntaxError(e) => {
            (format!("malformed JSON: {e}"), json!({ "kind": "syntax_error" }))
        }
        JsonRejection::MissingJsonContentType(_) => (
            "expected Content-Type: application/json".to_string(),
            json!({ "kind": "missing_content_type" }),
        ),
        JsonRejection::BytesRejection(e) => {
            (format!("request body error: {e}"), json!({ "kind": "body_error" }))
        }
        other => (format!("request body error: {other}"), json!({ "kind": "unknown" })),
    }
}

// ── WebSocket frame validation ─────────────────────────────────────

pub fn check_ws_frame_size(payload: &[u8]) -> Result<(), String> {
    if payload.len() > MAX_WS_FRAME_BYTES {
        Err(format!(
            "frame size {} bytes exceeds limit of {} bytes",
            payload.len(),
            MAX_WS_FRAME_BYTES
        ))
    } else {
        Ok(())
    }
}

// ── Field rules ────────────────────────────────────────────────────

fn field_error(field: &str, message: impl Into<String>) -> RelayError {
    RelayError::new(ErrorCode::ValidationFailed, message).with_details(json!({ "field": field }))
}

/// Trims and checks a required text field, returning the trimmed value.
pub fn required_text(field: &str, value: &str, max_chars: usize) -> Result<String, RelayError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(field_error(field, format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > max_chars {
        return Err(field_error(field, format!("{field} must be at most {max_chars} characters")));
    }
    Ok(trimmed.to_owned())
}

/// Like [`required_text`] but blank input becomes `None`.
pub fn optional_text(
    field: &str,
    value: Option<&str>,
    max_chars: usize,
) -> Result<Option<String>, RelayError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => required_text(field, text, max_chars).map(Some),
    }
}

pub fn max_members(value: Option<u32>) -> Result<u32, RelayError> {
    let value = value.unwrap_or(DEFAULT_MAX_MEMBERS);
    if !(MIN_MAX_MEMBERS..=MAX_MAX_MEMBERS).contains(&value) {
        return Err(field_error(
            "max_members",
            format!("max_members must be between {MIN_MAX_MEMBERS} and {MAX_MAX_MEMBERS}"),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        routing::post,
        Router,
    };
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize)]
    struct TestPayload {
        name: String,
    }

    async fn echo_handler(ValidatedJson(payload): ValidatedJson<TestPayload>) -> impl IntoResponse {
        (StatusCode::OK, payload.name)
    }

    fn test_app() -> Router {
        Router::new().route("/test", post(echo_handler))
    }

    async fn post_body(content_type: Option<&str>, body: &'static str) -> axum::response::Response {
        let mut builder = Request::builder().method(Method::POST).uri("/test");
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        test_app().oneshot(builder.body(Body::from(body)).unwrap()).await.unwrap()
    }

    async fn error_kind(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["code"], "VALIDATION_FAILED");
        parsed["error"]["details"]["kind"].clone()
    }

    #[tokio::test]
    async fn validated_json_accepts_valid_payload() {
        let response = post_body(Some("application/json"), r#"{"name":"Friday Night"}"#).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"Friday Night");
    }

    #[tokio::test]
    async fn validated_json_rejects_missing_content_type() {
        let response = post_body(None, r#"{"name":"Friday Night"}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_kind(response).await, "missing_content_type");
    }

    #[tokio::test]
    async fn validated_json_rejects_malformed_json() {
        let response = post_body(Some("application/json"), "not json").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_kind(response).await, "syntax_error");
    }

    #[tokio::test]
    async fn validated_json_rejects_missing_field() {
        let response = post_body(Some("application/json"), r#"{"size": 4}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_kind(response).await, "data_error");
    }

    #[test]
    fn ws_frame_size_limit() {
        assert!(check_ws_frame_size(&vec![0u8; MAX_WS_FRAME_BYTES]).is_ok());
        let err = check_ws_frame_size(&vec![0u8; MAX_WS_FRAME_BYTES + 1]).unwrap_err();
        assert!(err.contains("exceeds limit"));
    }

    #[test]
    fn required_text_trims_and_bounds() {
        assert_eq!(required_text("name", "  Noir Club ", 100).unwrap(), "Noir Club");
        assert!(required_text("name", "   ", 100).is_err());
        assert!(required_text("name", &"x".repeat(101), 100).is_err());
        // Counted in characters, not bytes.
        assert!(required_text("name", &"é".repeat(100), 100).is_ok());
    }

    #[test]
    fn optional_text_treats_blank_as_absent() {
        assert_eq!(optional_text("description", Some("   "), 500).unwrap(), None);
        assert_eq!(optional_text("description", None, 500).unwrap(), None);
        assert_eq!(
            optional_text("description", Some(" horror only "), 500).unwrap().as_deref(),
            Some("horror only")
        );
    }

    #[test]
    fn max_members_defaults_and_bounds() {
        assert_eq!(max_members(None).unwrap(), DEFAULT_MAX_MEMBERS);
        assert_eq!(max_members(Some(2)).unwrap(), 2);
        assert!(max_members(Some(1)).is_err());
        assert!(max_members(Some(501)).is_err());
    }
}
