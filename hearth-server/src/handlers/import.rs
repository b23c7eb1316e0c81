//! NDJSON import: the write-side companion of the export family.
//!
//! POST /$import — each line is parsed, structurally validated, and
//! submitted to the entry processor; per-line failures never abort the rest.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hearth_backend::{EntryMethod, EntryRequest};
use hearth_core::validation;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;

/// POST /$import — import resources from an NDJSON body
pub async fn import(State(state): State<Arc<AppState>>, body: String) -> Response {
    let mut created: usize = 0;
    let mut errors: Vec<Value> = Vec::new();

    for (line_num, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let resource: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                errors.push(json!({
                    "line": line_num + 1,
                    "error": format!("Invalid JSON: {}", e)
                }));
                continue;
            }
        };

        let resource_type = match resource.get("resourceType").and_then(|v| v.as_str()) {
            Some(rt) => rt.to_string(),
            None => {
                errors.push(json!({
                    "line": line_num + 1,
                    "error": "Missing resourceType"
                }));
                continue;
            }
        };

        if let Err(outcome) = validation::ensure_valid(&resource) {
            let diag = outcome
                .issue
                .first()
                .and_then(|i| i.diagnostics.as_deref())
                .unwrap_or("Validation failed")
                .to_string();
            errors.push(json!({
                "line": line_num + 1,
                "resourceType": resource_type,
                "error": diag
            }));
            continue;
        }

        // lines carrying an id upsert in place, the rest create
        let id = resource
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let request = EntryRequest {
            method: if id.is_some() {
                EntryMethod::Put
            } else {
                EntryMethod::Post
            },
            resource_type: resource_type.clone(),
            id,
            query: None,
            resource: Some(resource),
            if_match: None,
            if_none_exist: None,
        };

        match state.processor.process(&request).await {
            Ok(_) => created += 1,
            Err(e) => {
                errors.push(json!({
                    "line": line_num + 1,
                    "resourceType": resource_type,
                    "error": e.to_string()
                }));
            }
        }
    }

    tracing::info!(created, errors = errors.len(), "NDJSON import finished");

    let response = json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": if errors.is_empty() { "information" } else { "warning" },
            "code": "informational",
            "diagnostics": format!("{} resources imported, {} errors", created, errors.len())
        }],
        "extension": [{
            "url": "http://hearth.dev/StructureDefinition/import-result",
            "extension": [
                {"url": "created", "valueInteger": created},
                {"url": "errors", "valueInteger": errors.len()}
            ]
        }],
        "details": if errors.is_empty() { Value::Null } else { json!(errors) }
    });

    let status = if !errors.is_empty() && created == 0 {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };

    (status, Json(response)).into_response()
}
