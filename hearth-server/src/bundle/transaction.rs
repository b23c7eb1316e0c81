//! Transaction Bundle processing (all-or-nothing)

use crate::AppState;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use hearth_backend::{BackendError, EntryRequest};
use hearth_core::{
    operation_outcome::IssueType,
    OperationOutcome,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Process a transaction Bundle (all-or-nothing).
///
/// Entries run sequentially in document order inside one transactional
/// context; the first failure rolls everything back and reports the
/// failing entry index.
pub(super) async fn process_transaction(
    state: &Arc<AppState>,
    entries: Vec<EntryRequest>,
) -> axum::response::Response {
    let mut tx = match state.processor.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            let outcome = OperationOutcome::error(
                IssueType::Exception,
                format!("failed to open transaction: {}", e),
            );
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!(outcome))).into_response();
        }
    };

    let mut response_entries: Vec<Value> = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        match tx.process(entry).await {
            Ok(outcome) => response_entries.push(outcome.to_response_entry()),
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "transaction rollback failed");
                    let outcome = OperationOutcome::error(
                        IssueType::Exception,
                        format!("rollback failed after entry[{}] error: {}", i, rollback_err),
                    );
                    return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!(outcome)))
                        .into_response();
                }
                tracing::warn!(entry = i, error = %e, "transaction entry failed, rolled back");

                let status = match e {
                    BackendError::Conflict(_) => StatusCode::CONFLICT,
                    _ => StatusCode::BAD_REQUEST,
                };
                let outcome = OperationOutcome::error(
                    IssueType::Processing,
                    format!("transaction failed at entry[{}]: {}", i, e),
                );
                return (status, Json(json!(outcome))).into_response();
            }
        }
    }

    if let Err(e) = tx.commit().await {
        tracing::error!(error = %e, "transaction commit failed");
        let outcome = OperationOutcome::error(
            IssueType::Exception,
            format!("transaction commit failed: {}", e),
        );
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!(outcome))).into_response();
    }

    tracing::info!(entries = response_entries.len(), "transaction committed");

    let response_bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction-response",
        "entry": response_entries
    });

    (StatusCode::OK, Json(response_bundle)).into_response()
}
