//! HTTP API endpoints (OpenAI-compatible surface).

pub mod chat;
pub mod health;
pub mod models;
pub mod types;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};

use crate::error::BridgeError;
use crate::AppState;

/// Create the API router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(models::router())
        .merge(chat::router())
        .fallback(not_found)
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "unknown endpoint")
}

/// The uniform OpenAI-shaped error body.
pub(crate) fn error_body(message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": message,
            "type": "windsurf_error",
            "param": null,
            "code": null,
        }
    })
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(error_body(message))).into_response()
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        error_response(status, &self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_shape() {
        let body = error_body("boom");
        assert_eq!(body["error"]["message"], "boom");
        assert_eq!(body["error"]["type"], "windsurf_error");
        assert!(body["error"]["param"].is_null());
        assert!(body["error"]["code"].is_null());
    }
}
