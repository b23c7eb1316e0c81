//! Patient compartment search: proxies typed search with the patient
//! parameter pinned.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use hearth_core::search_bundle::{SearchPage, search_bundle};
use hearth_core::PlatformError;
use std::collections::HashMap;
use std::sync::Arc;

use crate::AppState;
use crate::respond::error_response;

/// POST /Patient/{pid}/{type} — search `type` within the patient compartment
pub async fn compartment_search(
    State(state): State<Arc<AppState>>,
    Path((patient_id, resource_type)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut parameters: Vec<(String, String)> = params
        .iter()
        .filter(|(name, _)| !name.starts_with('_'))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    parameters.sort();
    parameters.push(("patient".to_string(), patient_id.clone()));

    let resources = match state.search.search(&resource_type, &parameters).await {
        Ok(resources) => resources,
        Err(e) => return error_response(&PlatformError::Exception(e.to_string())),
    };

    let count = params
        .get("_count")
        .and_then(|c| c.parse().ok())
        .unwrap_or(100);
    let page = SearchPage {
        count,
        total: Some(resources.len() as u64),
        has_more: false,
        next_cursor: String::new(),
    };
    let base = format!("/Patient/{}/{}", patient_id, resource_type);
    let query: String = parameters
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&");

    axum::Json(search_bundle(resources, &base, &query, &page)).into_response()
}
