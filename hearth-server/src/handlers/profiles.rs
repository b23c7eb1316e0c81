//! Profile endpoints: StructureDefinition listing and `$validate`.
//!
//! `$validate` always answers 200 with an OperationOutcome; only a
//! malformed body is a 400.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hearth_core::profile::validator::{self, ProfileIssue, ProfileIssueSeverity};
use hearth_core::{PlatformError, validation};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::handlers::{parameters_resource, parameters_value};
use crate::respond::error_response;

/// Listing id of a profile: the last segment of its canonical URL.
fn profile_listing_id(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

/// GET /StructureDefinition — all registered profiles as a searchset
pub async fn list_profiles(State(state): State<Arc<AppState>>) -> Json<Value> {
    let registry = state.profiles.read().unwrap();
    let entries: Vec<Value> = registry
        .list()
        .iter()
        .map(|profile| {
            json!({
                "fullUrl": format!("StructureDefinition/{}", profile_listing_id(&profile.url)),
                "resource": profile.to_structure_definition(),
                "search": {"mode": "match"},
            })
        })
        .collect();
    Json(json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": entries.len(),
        "entry": entries,
    }))
}

/// GET /StructureDefinition/{id} — fetch one profile by listing id or URL
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let registry = state.profiles.read().unwrap();
    let found = registry
        .list()
        .into_iter()
        .find(|p| p.url == id || profile_listing_id(&p.url) == id);
    match found {
        Some(profile) => Json(profile.to_structure_definition()).into_response(),
        None => error_response(&PlatformError::NotFound(format!(
            "StructureDefinition/{}",
            id
        ))),
    }
}

fn profile_issue_json(issue: &ProfileIssue) -> Value {
    json!({
        "severity": match issue.severity {
            ProfileIssueSeverity::Error => "error",
            ProfileIssueSeverity::Warning => "warning",
        },
        "code": issue.code,
        "diagnostics": issue.message,
        "expression": [issue.path],
    })
}

/// POST /$validate — structural plus profile validation, 200 always
pub async fn validate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    // unwrap a Parameters envelope when present
    let (resource, profile_url) =
        if body.get("resourceType").and_then(|v| v.as_str()) == Some("Parameters") {
            let resource = match parameters_resource(&body, "resource") {
                Some(r) => r,
                None => {
                    return error_response(&PlatformError::Required(
                        "Parameters must carry a 'resource' parameter".to_string(),
                    ));
                }
            };
            let profile = parameters_value(&body, "profile")
                .and_then(|v| v.as_str().map(|s| s.to_string()));
            (resource, profile)
        } else {
            (body, None)
        };

    let mut issues: Vec<Value> = validation::validate_structure(&resource)
        .iter()
        .map(|issue| json!(issue))
        .collect();

    let registry = state.profiles.read().unwrap();
    match profile_url {
        Some(url) => match validator::validate_against_profile(&registry, &url, &resource) {
            Ok(profile_issues) => {
                issues.extend(profile_issues.iter().map(profile_issue_json));
            }
            Err(e) => {
                issues.push(json!({
                    "severity": "error",
                    "code": e.issue_type(),
                    "diagnostics": e.to_string(),
                }));
            }
        },
        None => {
            let profile_issues = validator::validate_resource(&registry, &resource);
            issues.extend(profile_issues.iter().map(profile_issue_json));
        }
    }

    if issues.is_empty() {
        issues.push(json!({
            "severity": "information",
            "code": "informational",
            "diagnostics": "Validation successful",
        }));
    }

    (
        StatusCode::OK,
        Json(json!({"resourceType": "OperationOutcome", "issue": issues})),
    )
        .into_response()
}
