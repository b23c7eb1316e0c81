//! Request logging: FHIR interaction classification and a non-blocking
//! record sink.
//!
//! Every request is classified by method and path shape, logged through
//! `tracing`, and offered to a bounded channel; a full channel drops the
//! record rather than stall the request path.

use crate::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// FHIR interaction kinds the classifier distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interaction {
    Read,
    Vread,
    SearchType,
    Create,
    Update,
    Delete,
    HistoryInstance,
    HistoryType,
    Operation,
}

impl Interaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Vread => "vread",
            Self::SearchType => "search-type",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::HistoryInstance => "history-instance",
            Self::HistoryType => "history-type",
            Self::Operation => "operation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub interaction: Interaction,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub operation: Option<String>,
}

/// Classify a request into its FHIR interaction from method + path shape.
pub fn classify(method: &str, path: &str) -> Classification {
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    // an $operation segment anywhere makes this an operation call
    if let Some(op) = segments.iter().find(|s| s.starts_with('$')) {
        let resource_type = segments
            .first()
            .filter(|s| !s.starts_with('$'))
            .map(|s| s.to_string());
        let resource_id = match segments.len() {
            3 if segments[2].starts_with('$') => Some(segments[1].to_string()),
            _ => None,
        };
        return Classification {
            interaction: Interaction::Operation,
            resource_type,
            resource_id,
            operation: Some(op.trim_start_matches('$').to_string()),
        };
    }

    if let Some(history_at) = segments.iter().position(|s| *s == "_history") {
        return match history_at {
            1 => Classification {
                interaction: Interaction::HistoryType,
                resource_type: Some(segments[0].to_string()),
                resource_id: None,
                operation: None,
            },
            2 if segments.len() == 3 => Classification {
                interaction: Interaction::HistoryInstance,
                resource_type: Some(segments[0].to_string()),
                resource_id: Some(segments[1].to_string()),
                operation: None,
            },
            _ => Classification {
                interaction: Interaction::Vread,
                resource_type: segments.first().map(|s| s.to_string()),
                resource_id: segments.get(1).map(|s| s.to_string()),
                operation: None,
            },
        };
    }

    match (method, segments.len()) {
        ("GET" | "HEAD", 1) => Classification {
            interaction: Interaction::SearchType,
            resource_type: Some(segments[0].to_string()),
            resource_id: None,
            operation: None,
        },
        ("GET" | "HEAD", 2) => Classification {
            interaction: Interaction::Read,
            resource_type: Some(segments[0].to_string()),
            resource_id: Some(segments[1].to_string()),
            operation: None,
        },
        ("POST", 1) => Classification {
            interaction: Interaction::Create,
            resource_type: Some(segments[0].to_string()),
            resource_id: None,
            operation: None,
        },
        ("PUT" | "PATCH", 2) => Classification {
            interaction: Interaction::Update,
            resource_type: Some(segments[0].to_string()),
            resource_id: Some(segments[1].to_string()),
            operation: None,
        },
        ("DELETE", 2) => Classification {
            interaction: Interaction::Delete,
            resource_type: Some(segments[0].to_string()),
            resource_id: Some(segments[1].to_string()),
            operation: None,
        },
        _ => Classification {
            interaction: Interaction::Operation,
            resource_type: segments.first().map(|s| s.to_string()),
            resource_id: None,
            operation: None,
        },
    }
}

/// One structured request record offered to the sink.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub interaction: Interaction,
    pub operation: Option<String>,
    pub status_code: u16,
    pub duration_ms: u128,
    pub response_size: Option<u64>,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub tenant_id: Option<String>,
    pub request_id: String,
    pub prefer_header: Option<String>,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
}

/// Non-blocking record sink over a bounded channel.
#[derive(Clone)]
pub struct RequestLogger {
    tx: mpsc::Sender<RequestRecord>,
}

impl RequestLogger {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RequestRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Offer a record; a full channel drops it silently.
    pub fn record(&self, record: RequestRecord) {
        let _ = self.tx.try_send(record);
    }
}

fn header_string(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Middleware emitting one record per request.
pub async fn log_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let classification = classify(&method, &path);

    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = header_string(&request, "user-agent");
    let tenant_id = header_string(&request, "x-tenant-id");
    let request_id = header_string(&request, "x-request-id")
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let prefer_header = header_string(&request, "prefer");
    let if_match = header_string(&request, "if-match");
    let if_none_match = header_string(&request, "if-none-match");

    let response = next.run(request).await;

    let status_code = response.status().as_u16();
    let response_size = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());
    let duration_ms = started.elapsed().as_millis();

    tracing::info!(
        method = %method,
        path = %path,
        interaction = classification.interaction.as_str(),
        resource_type = classification.resource_type.as_deref().unwrap_or(""),
        status = status_code,
        duration_ms = duration_ms as u64,
        request_id = %request_id,
        "request"
    );

    state.request_log.record(RequestRecord {
        timestamp: Utc::now(),
        method,
        path,
        resource_type: classification.resource_type,
        resource_id: classification.resource_id,
        interaction: classification.interaction,
        operation: classification.operation,
        status_code,
        duration_ms,
        response_size,
        client_ip,
        user_agent,
        tenant_id,
        request_id,
        prefer_header,
        if_match,
        if_none_match,
    });

    response
}
