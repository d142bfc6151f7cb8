use crate::handler::{HandlerError, ResourceSchema, UnmatchedRoute};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};

pub const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";
pub const NOT_FOUND_BODY: &str = "Not Found.";

/// Serialize `body` with the JSON content type
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
            bytes,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode response body: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// 200 with the value, or the error's status with `{"error": ...}`
pub fn reply<T: Serialize>(result: Result<T, HandlerError>) -> Response {
    match result {
        Ok(value) => json_response(StatusCode::OK, &value),
        Err(e) => e.into_response(),
    }
}

pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response()
}

/// Answer for a request under a resource that matched none of its routes
pub fn unmatched(schema: &ResourceSchema, fallback_url: &str) -> Response {
    match schema.unmatched {
        UnmatchedRoute::NotFound => not_found(),
        UnmatchedRoute::FallbackUrl => json_response(StatusCode::OK, &fallback_url),
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected ({}): {}", status.as_u16(), self);
        }

        json_response(status, &json!({ "error": self.to_string() }))
    }
}
