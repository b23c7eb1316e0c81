//! OperationOutcome response rendering.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hearth_core::PlatformError;
use serde_json::json;

/// Render a platform error as its OperationOutcome response.
pub fn error_response(err: &PlatformError) -> Response {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!(err.to_outcome()))).into_response()
}
