//! `Composition/$document`: assemble a document Bundle from a Composition's
//! reference closure.

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use hearth_core::{PlatformError, document};
use serde_json::Value;
use std::sync::Arc;

use crate::AppState;
use crate::handlers::parameters_resource;
use crate::respond::error_response;

async fn assemble(state: &AppState, composition: Value) -> Response {
    if let Err(e) = document::validate_composition(&composition) {
        return error_response(&e);
    }

    let references = document::collect_references(&composition);
    let mut resolved = Vec::new();
    for reference in &references {
        match state.resolver.resolve(reference).await {
            Ok(Some(resource)) => resolved.push(resource),
            // unresolvable references are silently skipped
            Ok(None) => {
                tracing::debug!(reference = %reference, "document reference did not resolve");
            }
            Err(e) => {
                tracing::warn!(reference = %reference, error = %e, "document reference lookup failed");
            }
        }
    }

    tracing::info!(
        references = references.len(),
        resolved = resolved.len(),
        "document assembled"
    );
    Json(document::build_document_bundle(composition, resolved)).into_response()
}

/// POST /Composition/$document — inline Composition (or Parameters wrapper)
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let composition = if body.get("resourceType").and_then(|v| v.as_str()) == Some("Parameters")
    {
        match parameters_resource(&body, "resource")
            .or_else(|| parameters_resource(&body, "composition"))
        {
            Some(c) => c,
            None => {
                return error_response(&PlatformError::Required(
                    "Parameters must carry a Composition resource".to_string(),
                ));
            }
        }
    } else {
        body
    };
    assemble(&state, composition).await
}

/// GET /Composition/{id}/$document — resolve the Composition by id
pub async fn generate_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let reference = format!("Composition/{}", id);
    match state.resolver.resolve(&reference).await {
        Ok(Some(composition)) => assemble(&state, composition).await,
        Ok(None) => error_response(&PlatformError::NotFound(reference)),
        Err(e) => error_response(&PlatformError::Exception(e.to_string())),
    }
}
