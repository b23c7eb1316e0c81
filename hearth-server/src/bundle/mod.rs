//! Bundle (transaction/batch) processing
//!
//! POST / — accepts a Bundle of type "transaction" or "batch", parses each
//! entry's request side, and drives the host-supplied entry processor.

mod batch;
mod transaction;

use crate::AppState;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use hearth_backend::{EntryMethod, EntryRequest};
use hearth_core::{
    operation_outcome::IssueType,
    OperationOutcome,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Parse request.url into resource type, optional id, and query string.
/// "Patient" -> ("Patient", None, None)
/// "Patient/123" -> ("Patient", Some("123"), None)
/// "Patient?name=x" -> ("Patient", None, Some("name=x"))
fn parse_request_url(url: &str) -> Option<(String, Option<String>, Option<String>)> {
    let url = url.trim_start_matches('/');
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (url, None),
    };
    if path.is_empty() {
        return None;
    }
    let parts: Vec<&str> = path.splitn(2, '/').collect();
    let resource_type = parts[0].to_string();
    let id = parts.get(1).map(|s| s.to_string());
    Some((resource_type, id, query))
}

/// Parse all entries from a Bundle value into processor requests.
fn parse_entries(bundle: &Value) -> Result<Vec<EntryRequest>, OperationOutcome> {
    let entries = bundle
        .get("entry")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            OperationOutcome::error(IssueType::Invalid, "Bundle.entry is missing or not an array")
        })?;

    let mut parsed = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let request = entry.get("request").ok_or_else(|| {
            OperationOutcome::error(
                IssueType::Required,
                format!("entry[{}].request is required", i),
            )
        })?;

        let method_str = request
            .get("method")
            .and_then(|m| m.as_str())
            .ok_or_else(|| {
                OperationOutcome::error(
                    IssueType::Required,
                    format!("entry[{}].request.method is required", i),
                )
            })?;

        let method = EntryMethod::parse(method_str).ok_or_else(|| {
            OperationOutcome::error(
                IssueType::NotSupported,
                format!(
                    "entry[{}].request.method '{}' is not supported (use GET, POST, PUT, PATCH, or DELETE)",
                    i, method_str
                ),
            )
        })?;

        let url = request
            .get("url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| {
                OperationOutcome::error(
                    IssueType::Required,
                    format!("entry[{}].request.url is required", i),
                )
            })?;

        let (resource_type, id, query) = parse_request_url(url).ok_or_else(|| {
            OperationOutcome::error(
                IssueType::Invalid,
                format!("entry[{}].request.url is invalid: '{}'", i, url),
            )
        })?;

        parsed.push(EntryRequest {
            method,
            resource_type,
            id,
            query,
            resource: entry.get("resource").cloned(),
            if_match: request
                .get("ifMatch")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            if_none_exist: request
                .get("ifNoneExist")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        });
    }
    Ok(parsed)
}

/// Build an error response entry for batch-response.
pub(crate) fn error_entry(status: &str, message: &str) -> Value {
    json!({
        "response": {
            "status": status,
            "outcome": OperationOutcome::error(IssueType::Processing, message)
        }
    })
}

/// POST / — process a Bundle (transaction or batch)
pub async fn process_bundle(
    State(state): State<Arc<AppState>>,
    Json(bundle): Json<Value>,
) -> impl IntoResponse {
    // Validate top-level structure
    let rt = bundle.get("resourceType").and_then(|v| v.as_str());
    if rt != Some("Bundle") {
        let outcome =
            OperationOutcome::error(IssueType::Invalid, "resourceType must be 'Bundle'");
        return (StatusCode::BAD_REQUEST, Json(json!(outcome))).into_response();
    }

    let bundle_type = match bundle.get("type").and_then(|v| v.as_str()) {
        Some(t @ ("transaction" | "batch")) => t.to_string(),
        _ => {
            let outcome = OperationOutcome::error(
                IssueType::Invalid,
                "Bundle.type must be 'transaction' or 'batch'",
            );
            return (StatusCode::BAD_REQUEST, Json(json!(outcome))).into_response();
        }
    };

    // Parse entries
    let entries = match parse_entries(&bundle) {
        Ok(e) => e,
        Err(outcome) => {
            return (StatusCode::BAD_REQUEST, Json(json!(outcome))).into_response();
        }
    };

    if bundle_type == "transaction" {
        transaction::process_transaction(&state, entries).await
    } else {
        batch::process_batch(&state, entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_url_create() {
        let (rt, id, query) = parse_request_url("Patient").unwrap();
        assert_eq!(rt, "Patient");
        assert_eq!(id, None);
        assert_eq!(query, None);
    }

    #[test]
    fn test_parse_request_url_with_id() {
        let (rt, id, _) = parse_request_url("Patient/123").unwrap();
        assert_eq!(rt, "Patient");
        assert_eq!(id, Some("123".to_string()));
    }

    #[test]
    fn test_parse_request_url_strips_query() {
        let (rt, id, query) = parse_request_url("Patient?identifier=mrn|123").unwrap();
        assert_eq!(rt, "Patient");
        assert_eq!(id, None);
        assert_eq!(query, Some("identifier=mrn|123".to_string()));
    }

    #[test]
    fn test_parse_request_url_leading_slash() {
        let (rt, id, _) = parse_request_url("/Patient/123").unwrap();
        assert_eq!(rt, "Patient");
        assert_eq!(id, Some("123".to_string()));
    }

    #[test]
    fn test_parse_request_url_empty() {
        assert!(parse_request_url("").is_none());
        assert!(parse_request_url("?name=x").is_none());
    }

    #[test]
    fn test_parse_entries_requires_request() {
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": [{"resource": {"resourceType": "Patient"}}]
        });
        let outcome = parse_entries(&bundle).unwrap_err();
        assert!(outcome.issue[0]
            .diagnostics
            .as_ref()
            .unwrap()
            .contains("entry[0].request"));
    }

    #[test]
    fn test_parse_entries_rejects_unknown_method() {
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "batch",
            "entry": [{"request": {"method": "TRACE", "url": "Patient"}}]
        });
        assert!(parse_entries(&bundle).is_err());
    }

    #[test]
    fn test_parse_entries_carries_conditional_headers() {
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": [{
                "request": {
                    "method": "PUT",
                    "url": "Patient/p1",
                    "ifMatch": "W/\"2\"",
                    "ifNoneExist": "identifier=mrn|123"
                },
                "resource": {"resourceType": "Patient"}
            }]
        });
        let entries = parse_entries(&bundle).unwrap();
        assert_eq!(entries[0].if_match.as_deref(), Some("W/\"2\""));
        assert_eq!(entries[0].if_none_exist.as_deref(), Some("identifier=mrn|123"));
    }
}
