//! The `/metadata` family: CapabilityStatement snapshot, per-resource
//! capability fragments, server operations, and the custom search-parameter
//! registry endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hearth_core::{CustomSearchParam, PlatformError, SearchParamType};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::respond::error_response;

/// Health check (GET /health)
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "fhirVersion": "4.0.1"
    }))
}

/// CapabilityStatement snapshot (GET /metadata)
pub async fn capability_statement(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.capability.build())
}

/// Supported resource types (GET /metadata/resources)
pub async fn list_resources(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"resourceTypes": state.capability.resource_types()}))
}

/// Per-resource capability fragment (GET /metadata/resources/{type})
pub async fn resource_capability(
    State(state): State<Arc<AppState>>,
    Path(resource_type): Path<String>,
) -> Response {
    match state.capability.resource_capability(&resource_type) {
        Some(fragment) => Json(fragment).into_response(),
        None => error_response(&PlatformError::NotFound(format!(
            "resource type {} is not supported",
            resource_type
        ))),
    }
}

/// Server-level operations (GET /metadata/operations)
pub async fn list_operations(State(state): State<Arc<AppState>>) -> Json<Value> {
    let operations: Vec<Value> = state
        .capability
        .server_operations()
        .iter()
        .map(|op| json!({"name": op.name, "definition": op.definition}))
        .collect();
    Json(json!({"operations": operations}))
}

/// All custom search parameters (GET /metadata/search-params)
pub async fn list_search_params(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "searchParams": state.capability.list_all_custom_search_params()
    }))
}

fn param_type_from_code(code: &str) -> Option<SearchParamType> {
    Some(match code {
        "token" => SearchParamType::Token,
        "string" => SearchParamType::String,
        "date" => SearchParamType::Date,
        "reference" => SearchParamType::Reference,
        "number" => SearchParamType::Number,
        "uri" => SearchParamType::Uri,
        "quantity" => SearchParamType::Quantity,
        _ => return None,
    })
}

/// Accept either a FHIR SearchParameter resource or the plain registry shape.
fn parse_search_param(body: &Value) -> Result<CustomSearchParam, PlatformError> {
    if body.get("resourceType").and_then(|v| v.as_str()) == Some("SearchParameter") {
        let name = body
            .get("code")
            .or_else(|| body.get("name"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| PlatformError::Required("SearchParameter.code".to_string()))?;
        let base = body
            .get("base")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
            .ok_or_else(|| PlatformError::Required("SearchParameter.base".to_string()))?;
        let type_code = body
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PlatformError::Required("SearchParameter.type".to_string()))?;
        return Ok(CustomSearchParam {
            name: name.to_string(),
            resource_type: base.to_string(),
            param_type: param_type_from_code(type_code).ok_or_else(|| {
                PlatformError::Value(format!("unknown search parameter type '{}'", type_code))
            })?,
            expression: body
                .get("expression")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            description: body
                .get("description")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            url: body.get("url").and_then(|v| v.as_str()).map(|s| s.to_string()),
        });
    }

    serde_json::from_value(body.clone()).map_err(|e| {
        PlatformError::Structure(format!("invalid search parameter body: {}", e))
    })
}

/// Register a custom search parameter (POST /metadata/search-params)
pub async fn register_search_param(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let param = match parse_search_param(&body) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    tracing::info!(
        resource_type = %param.resource_type,
        name = %param.name,
        "custom search parameter registered"
    );
    state.capability.add_custom_search_param(param.clone());
    (StatusCode::CREATED, Json(json!(param))).into_response()
}

/// Remove a custom search parameter
/// (DELETE /metadata/search-params/{type}/{name})
pub async fn delete_search_param(
    State(state): State<Arc<AppState>>,
    Path((resource_type, name)): Path<(String, String)>,
) -> Response {
    match state.capability.delete_custom_search_param(&resource_type, &name) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fhir_search_parameter() {
        let body = json!({
            "resourceType": "SearchParameter",
            "url": "http://example.org/SearchParameter/patient-nickname",
            "code": "nickname",
            "base": ["Patient"],
            "type": "string",
            "expression": "Patient.name.nickname"
        });
        let param = parse_search_param(&body).unwrap();
        assert_eq!(param.name, "nickname");
        assert_eq!(param.resource_type, "Patient");
        assert_eq!(param.param_type, SearchParamType::String);
    }

    #[test]
    fn test_parse_plain_shape() {
        let body = json!({
            "name": "device-serial",
            "resourceType": "Observation",
            "type": "token"
        });
        let param = parse_search_param(&body).unwrap();
        assert_eq!(param.resource_type, "Observation");
        assert_eq!(param.param_type, SearchParamType::Token);
    }

    #[test]
    fn test_parse_rejects_bad_type() {
        let body = json!({
            "resourceType": "SearchParameter",
            "code": "x",
            "base": ["Patient"],
            "type": "hologram"
        });
        assert!(parse_search_param(&body).is_err());
    }
}
