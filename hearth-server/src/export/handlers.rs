//! HTTP surface of the Bulk Data export family.
//!
//! POST/GET /$export, /Patient/$export, /Patient/{id}/$export,
//! /Group/{id}/$export — kickoff (202 + Content-Location)
//! GET    /$export-status/{id} — poll (202 while running, 200 manifest)
//! GET    /$export-data/{id}/{type} — stream NDJSON
//! DELETE /$export-status/{id} — cancel/delete (204)

use super::{JobStatus, KickoffOptions, NDJSON_CONTENT_TYPE};
use crate::AppState;
use crate::respond::error_response;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use hearth_core::PlatformError;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

struct KickoffParams {
    types: Vec<String>,
    since: Option<DateTime<Utc>>,
    type_filter: Vec<String>,
    output_format: Option<String>,
}

fn parse_kickoff(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<KickoffParams, PlatformError> {
    if let Some(prefer) = headers.get("prefer").and_then(|v| v.to_str().ok())
        && prefer != "respond-async"
    {
        return Err(PlatformError::Value(format!(
            "Prefer header must be 'respond-async', got '{}'",
            prefer
        )));
    }

    let types = params
        .get("_type")
        .map(|t| {
            t.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let since = params
        .get("_since")
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| PlatformError::Value(format!("invalid _since instant '{}'", s)))
        })
        .transpose()?;

    let type_filter = params
        .get("_typeFilter")
        .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    Ok(KickoffParams {
        types,
        since,
        type_filter,
        output_format: params.get("_outputFormat").cloned(),
    })
}

fn accepted(state: &AppState, job_id: &str) -> Response {
    let status_url = format!(
        "{}/$export-status/{}",
        state.config.export.base_path.trim_end_matches('/'),
        job_id
    );
    (
        StatusCode::ACCEPTED,
        [(header::CONTENT_LOCATION, status_url)],
        Json(json!({
            "resourceType": "OperationOutcome",
            "issue": [{
                "severity": "information",
                "code": "informational",
                "diagnostics": format!("export job {} accepted", job_id)
            }]
        })),
    )
        .into_response()
}

/// System-level kickoff.
pub async fn kickoff_system(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.export.cleanup_expired_jobs();
    let parsed = match parse_kickoff(&headers, &params) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    let result = state.export.kick_off_system_with(
        parsed.types,
        parsed.since,
        KickoffOptions {
            output_format: parsed.output_format,
            type_filter: parsed.type_filter,
        },
    );
    match result {
        Ok(job) => accepted(&state, &job.id),
        Err(e) => error_response(&e),
    }
}

/// Patient-type kickoff: every patient compartment.
pub async fn kickoff_all_patients(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.export.cleanup_expired_jobs();
    let parsed = match parse_kickoff(&headers, &params) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    match state.export.kick_off_system_with(
        parsed.types,
        parsed.since,
        KickoffOptions {
            output_format: parsed.output_format,
            type_filter: parsed.type_filter,
        },
    ) {
        Ok(job) => accepted(&state, &job.id),
        Err(e) => error_response(&e),
    }
}

/// Single-patient kickoff.
pub async fn kickoff_patient(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.export.cleanup_expired_jobs();
    let parsed = match parse_kickoff(&headers, &params) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    match state.export.kick_off_patient_with(
        parsed.types,
        &patient_id,
        parsed.since,
        KickoffOptions {
            output_format: parsed.output_format,
            type_filter: parsed.type_filter,
        },
    ) {
        Ok(job) => accepted(&state, &job.id),
        Err(e) => error_response(&e),
    }
}

/// Group kickoff; the group resolves to its member patients.
pub async fn kickoff_group(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.export.cleanup_expired_jobs();
    let parsed = match parse_kickoff(&headers, &params) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    match state
        .export
        .kick_off_group_with(
            &group_id,
            parsed.types,
            parsed.since,
            KickoffOptions {
                output_format: parsed.output_format,
                type_filter: parsed.type_filter,
            },
        )
        .await
    {
        Ok(job) => accepted(&state, &job.id),
        Err(e) => error_response(&e),
    }
}

/// GET /$export-status/{id}
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    let Some(job) = state.export.get_status(&job_id) else {
        return error_response(&PlatformError::NotFound(format!("export job {}", job_id)));
    };

    match job.status {
        JobStatus::InProgress => (
            StatusCode::ACCEPTED,
            [
                (
                    "X-Progress",
                    format!(
                        "{}/{} resource types processed",
                        job.processed_types, job.total_types
                    ),
                ),
                ("Retry-After", "120".to_string()),
            ],
        )
            .into_response(),
        JobStatus::Error => {
            let message = job
                .error_message
                .unwrap_or_else(|| "export failed".to_string());
            error_response(&PlatformError::Exception(message))
        }
        JobStatus::Complete => {
            let output: Vec<_> = job
                .output_files
                .iter()
                .map(|f| json!({"type": f.resource_type, "url": f.url, "count": f.count}))
                .collect();
            Json(json!({
                "transactionTime": job.request_time.to_rfc3339(),
                "requiresAccessToken": true,
                "output": output,
                "error": [],
            }))
            .into_response()
        }
    }
}

/// GET /$export-data/{id}/{type}
pub async fn data(
    State(state): State<Arc<AppState>>,
    Path((job_id, resource_type)): Path<(String, String)>,
) -> Response {
    match state.export.get_job_data(&job_id, &resource_type) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
            bytes,
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// DELETE /$export-status/{id}
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    match state.export.delete_job(&job_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}
