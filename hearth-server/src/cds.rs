//! CDS Hooks 2.0: service discovery, invocation, and feedback.
//!
//! GET  /cds-services — discovery document
//! POST /cds-services/{id} — invoke a hook
//! POST /cds-services/{id}/feedback — record card feedback

use crate::AppState;
use crate::respond::error_response;
use async_trait::async_trait;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hearth_core::PlatformError;
use serde_json::{Value, json};
use std::sync::{Arc, RwLock};

/// Static description of one CDS service.
#[derive(Debug, Clone)]
pub struct CdsService {
    /// Hook this service subscribes to, e.g. `patient-view`
    pub hook: String,
    pub id: String,
    pub title: Option<String>,
    pub description: String,
    pub prefetch: Option<Value>,
    pub usage_requirements: Option<String>,
}

impl CdsService {
    fn to_discovery_entry(&self) -> Value {
        let mut entry = json!({
            "hook": self.hook,
            "id": self.id,
            "description": self.description,
        });
        if let Some(ref title) = self.title {
            entry["title"] = json!(title);
        }
        if let Some(ref prefetch) = self.prefetch {
            entry["prefetch"] = prefetch.clone();
        }
        if let Some(ref usage) = self.usage_requirements {
            entry["usageRequirements"] = json!(usage);
        }
        entry
    }
}

/// Produces the cards for one service invocation.
#[async_trait]
pub trait CdsHandler: Send + Sync {
    async fn invoke(&self, request: &Value) -> Result<Value, String>;
}

/// Receives card feedback when registered.
#[async_trait]
pub trait CdsFeedbackHandler: Send + Sync {
    async fn feedback(&self, service_id: &str, feedback: &Value) -> Result<(), String>;
}

/// Handler returning a fixed card list; scaffolding for demos and tests.
pub struct StaticCardHandler {
    pub cards: Vec<Value>,
}

#[async_trait]
impl CdsHandler for StaticCardHandler {
    async fn invoke(&self, _request: &Value) -> Result<Value, String> {
        Ok(json!({"cards": self.cards}))
    }
}

/// Registry of CDS services in registration order.
#[derive(Default)]
pub struct CdsRegistry {
    services: RwLock<Vec<(CdsService, Arc<dyn CdsHandler>)>>,
    feedback: RwLock<Option<Arc<dyn CdsFeedbackHandler>>>,
}

impl CdsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: CdsService, handler: Arc<dyn CdsHandler>) {
        self.services.write().unwrap().push((service, handler));
    }

    pub fn set_feedback_handler(&self, handler: Arc<dyn CdsFeedbackHandler>) {
        *self.feedback.write().unwrap() = Some(handler);
    }

    pub fn discovery(&self) -> Value {
        let services: Vec<Value> = self
            .services
            .read()
            .unwrap()
            .iter()
            .map(|(service, _)| service.to_discovery_entry())
            .collect();
        json!({"services": services})
    }

    fn get(&self, id: &str) -> Option<(CdsService, Arc<dyn CdsHandler>)> {
        self.services
            .read()
            .unwrap()
            .iter()
            .find(|(service, _)| service.id == id)
            .map(|(service, handler)| (service.clone(), handler.clone()))
    }
}

/// GET /cds-services
pub async fn discovery(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.cds.discovery())
}

/// POST /cds-services/{id}
pub async fn invoke(
    State(state): State<Arc<AppState>>,
    Path(service_id): Path<String>,
    Json(request): Json<Value>,
) -> Response {
    let Some((service, handler)) = state.cds.get(&service_id) else {
        return error_response(&PlatformError::NotFound(format!(
            "cds service {}",
            service_id
        )));
    };

    let hook = request.get("hook").and_then(|v| v.as_str()).unwrap_or("");
    if hook != service.hook {
        return error_response(&PlatformError::Value(format!(
            "service {} handles hook '{}', request carries '{}'",
            service_id, service.hook, hook
        )));
    }
    if request
        .get("hookInstance")
        .and_then(|v| v.as_str())
        .is_none_or(|v| v.is_empty())
    {
        return error_response(&PlatformError::Required(
            "hookInstance is required".to_string(),
        ));
    }

    match handler.invoke(&request).await {
        Ok(cards) => Json(cards).into_response(),
        Err(message) => {
            tracing::warn!(service = %service_id, error = %message, "cds invocation failed");
            error_response(&PlatformError::Exception(message))
        }
    }
}

/// POST /cds-services/{id}/feedback
pub async fn feedback(
    State(state): State<Arc<AppState>>,
    Path(service_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if state.cds.get(&service_id).is_none() {
        return error_response(&PlatformError::NotFound(format!(
            "cds service {}",
            service_id
        )));
    }

    let handler = state.cds.feedback.read().unwrap().clone();
    match handler {
        // no feedback sink registered: acknowledged no-op
        None => (StatusCode::OK, Json(json!({}))).into_response(),
        Some(handler) => match handler.feedback(&service_id, &body).await {
            Ok(()) => (StatusCode::OK, Json(json!({}))).into_response(),
            Err(message) => error_response(&PlatformError::Exception(message)),
        },
    }
}
