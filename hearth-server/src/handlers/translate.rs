//! `ConceptMap/$translate` endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use hearth_core::TranslateRequest;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::AppState;
use crate::handlers::parameters_value;
use crate::respond::error_response;

fn request_from_query(params: &HashMap<String, String>) -> TranslateRequest {
    TranslateRequest {
        url: params.get("url").cloned(),
        concept_map_id: None,
        code: params.get("code").cloned().unwrap_or_default(),
        system: params.get("system").cloned(),
        target_system: params.get("targetsystem").cloned(),
    }
}

fn request_from_parameters(body: &Value) -> TranslateRequest {
    let string_param = |name: &str| {
        parameters_value(body, name).and_then(|v| v.as_str().map(|s| s.to_string()))
    };
    TranslateRequest {
        url: string_param("url"),
        concept_map_id: None,
        code: string_param("code").unwrap_or_default(),
        system: string_param("system"),
        target_system: string_param("targetsystem"),
    }
}

fn run(state: &AppState, request: &TranslateRequest) -> Response {
    match state.translate.read().unwrap().translate(request) {
        Ok(result) => Json(result.to_parameters()).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /ConceptMap/$translate
pub async fn translate_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    run(&state, &request_from_query(&params))
}

/// POST /ConceptMap/$translate with a Parameters body
pub async fn translate_post(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    run(&state, &request_from_parameters(&body))
}

/// GET /ConceptMap/{id}/$translate
pub async fn translate_instance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut request = request_from_query(&params);
    request.concept_map_id = Some(id);
    run(&state, &request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_from_query() {
        let mut params = HashMap::new();
        params.insert("code".to_string(), "73211009".to_string());
        params.insert("system".to_string(), "http://snomed.info/sct".to_string());
        params.insert(
            "targetsystem".to_string(),
            "http://hl7.org/fhir/sid/icd-10-cm".to_string(),
        );

        let request = request_from_query(&params);
        assert_eq!(request.code, "73211009");
        assert_eq!(request.system.as_deref(), Some("http://snomed.info/sct"));
        assert!(request.url.is_none());
    }

    #[test]
    fn test_request_from_parameters() {
        let body = json!({
            "resourceType": "Parameters",
            "parameter": [
                {"name": "code", "valueCode": "29463-7"},
                {"name": "system", "valueUri": "http://loinc.org"},
                {"name": "targetsystem", "valueUri": "http://snomed.info/sct"}
            ]
        });
        let request = request_from_parameters(&body);
        assert_eq!(request.code, "29463-7");
        assert_eq!(request.target_system.as_deref(), Some("http://snomed.info/sct"));
    }
}
