//! Batch Bundle processing (each entry independent)

use super::error_entry;
use crate::AppState;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use hearth_backend::EntryRequest;
use serde_json::{json, Value};
use std::sync::Arc;

/// Process a batch Bundle (each entry independent).
///
/// Failures are recorded on their own entry and never touch siblings; the
/// overall response is always 200.
pub(super) async fn process_batch(
    state: &Arc<AppState>,
    entries: Vec<EntryRequest>,
) -> axum::response::Response {
    let mut response_entries: Vec<Value> = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        match state.processor.process(entry).await {
            Ok(outcome) => response_entries.push(outcome.to_response_entry()),
            Err(e) => {
                tracing::warn!(entry = i, error = %e, "batch entry failed");
                response_entries.push(error_entry(
                    "400 Bad Request",
                    &format!("entry[{}]: {}", i, e),
                ));
            }
        }
    }

    tracing::info!(entries = response_entries.len(), "batch processed");

    let response_bundle = json!({
        "resourceType": "Bundle",
        "type": "batch-response",
        "entry": response_entries
    });

    (StatusCode::OK, Json(response_bundle)).into_response()
}
