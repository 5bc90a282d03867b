// Error handling utilities and response helpers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Helper to create a JSON error response
pub fn json_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({"error": message}))).into_response()
}

/// Helper for internal server errors
pub fn internal_error(message: &str) -> Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, message)
}

/// Helper for a store that no longer accepts reads
pub fn unavailable(message: &str) -> Response {
    json_error(StatusCode::SERVICE_UNAVAILABLE, message)
}

/// Helper for task join errors
pub fn task_join_error(e: impl std::fmt::Display) -> Response {
    let msg = format!("Task join error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(json!({"error": msg})),
    )
        .into_response()
}
