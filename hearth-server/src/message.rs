//! `$process-message`: MessageHeader validation, event-keyed handler
//! dispatch, and response Bundle synthesis.

use crate::AppState;
use crate::respond::error_response;
use async_trait::async_trait;
use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use hearth_core::PlatformError;
use hearth_core::resource::{local_reference, resource_id_of};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Handler for one message event code.
#[async_trait]
pub trait MessageEventHandler: Send + Sync {
    /// Handle the event; returned resources are appended to the response
    /// Bundle. An `Err` string becomes a fatal-error response.
    async fn handle(
        &self,
        event: &str,
        focus: &[Value],
        bundle: &Value,
    ) -> Result<Vec<Value>, String>;
}

/// Event-code keyed registry of message handlers.
#[derive(Default)]
pub struct MessageRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn MessageEventHandler>>>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event: &str, handler: Arc<dyn MessageEventHandler>) {
        self.handlers
            .write()
            .unwrap()
            .insert(event.to_string(), handler);
    }

    fn get(&self, event: &str) -> Option<Arc<dyn MessageEventHandler>> {
        self.handlers.read().unwrap().get(event).cloned()
    }
}

/// Validate a message Bundle and pull out header, event, and focus set.
fn parse_message(bundle: &Value) -> Result<(Value, String, Vec<Value>), PlatformError> {
    if bundle.get("resourceType").and_then(|v| v.as_str()) != Some("Bundle") {
        return Err(PlatformError::Structure(
            "resourceType must be 'Bundle'".to_string(),
        ));
    }
    if bundle.get("type").and_then(|v| v.as_str()) != Some("message") {
        return Err(PlatformError::Value(
            "Bundle.type must be 'message'".to_string(),
        ));
    }
    let entries = bundle
        .get("entry")
        .and_then(|v| v.as_array())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| {
            PlatformError::Required("message Bundle must have at least one entry".to_string())
        })?;

    let header = entries[0]
        .get("resource")
        .filter(|r| r.get("resourceType").and_then(|v| v.as_str()) == Some("MessageHeader"))
        .ok_or_else(|| {
            PlatformError::Structure(
                "the first entry of a message Bundle must be a MessageHeader".to_string(),
            )
        })?
        .clone();

    let event = header
        .get("eventCoding")
        .and_then(|c| c.get("code"))
        .and_then(|v| v.as_str())
        .or_else(|| header.get("eventUri").and_then(|v| v.as_str()))
        .ok_or_else(|| {
            PlatformError::Required(
                "MessageHeader must carry eventCoding.code or eventUri".to_string(),
            )
        })?
        .to_string();

    // focus references resolve against entry fullUrls
    let mut focus = Vec::new();
    if let Some(references) = header.get("focus").and_then(|v| v.as_array()) {
        for reference in references {
            let Some(target) = reference.get("reference").and_then(|v| v.as_str()) else {
                continue;
            };
            for entry in entries {
                if entry.get("fullUrl").and_then(|v| v.as_str()) == Some(target)
                    && let Some(resource) = entry.get("resource")
                {
                    focus.push(resource.clone());
                }
            }
        }
    }

    Ok((header, event, focus))
}

fn response_header(original: &Value, event: &str, code: &str) -> Value {
    let mut header = json!({
        "resourceType": "MessageHeader",
        "id": uuid::Uuid::new_v4().to_string(),
        "response": {
            "identifier": resource_id_of(original).unwrap_or(""),
            "code": code,
        },
        "source": {"name": "hearth"},
    });
    if let Some(coding) = original.get("eventCoding") {
        header["eventCoding"] = coding.clone();
    } else {
        header["eventUri"] = json!(event);
    }
    header
}

fn response_bundle(entries: Vec<Value>) -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "message",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "entry": entries,
    })
}

fn entry_for(resource: Value) -> Value {
    let full_url = match resource_id_of(&resource) {
        Some(_) => local_reference(&resource),
        None => format!("urn:uuid:{}", uuid::Uuid::new_v4()),
    };
    json!({"fullUrl": full_url, "resource": resource})
}

/// Run a message Bundle through the registry and build the response Bundle.
pub async fn process(registry: &MessageRegistry, bundle: &Value) -> Result<Value, PlatformError> {
    let (header, event, focus) = parse_message(bundle)?;

    let Some(handler) = registry.get(&event) else {
        tracing::warn!(event = %event, "no message handler registered");
        let entries = vec![
            entry_for(response_header(&header, &event, "fatal-error")),
            entry_for(json!({
                "resourceType": "OperationOutcome",
                "issue": [{
                    "severity": "fatal",
                    "code": "not-supported",
                    "diagnostics": format!("no handler registered for event '{}'", event),
                }],
            })),
        ];
        return Ok(response_bundle(entries));
    };

    match handler.handle(&event, &focus, bundle).await {
        Ok(resources) => {
            tracing::info!(event = %event, resources = resources.len(), "message handled");
            let mut entries = vec![entry_for(response_header(&header, &event, "ok"))];
            entries.extend(resources.into_iter().map(entry_for));
            Ok(response_bundle(entries))
        }
        Err(message) => {
            tracing::warn!(event = %event, error = %message, "message handler failed");
            let entries = vec![
                entry_for(response_header(&header, &event, "fatal-error")),
                entry_for(json!({
                    "resourceType": "OperationOutcome",
                    "issue": [{
                        "severity": "fatal",
                        "code": "processing",
                        "diagnostics": message,
                    }],
                })),
            ];
            Ok(response_bundle(entries))
        }
    }
}

/// POST /$process-message
pub async fn process_message(
    State(state): State<Arc<AppState>>,
    Json(bundle): Json<Value>,
) -> Response {
    match process(&state.messages, &bundle).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl MessageEventHandler for EchoHandler {
        async fn handle(
            &self,
            _event: &str,
            focus: &[Value],
            _bundle: &Value,
        ) -> Result<Vec<Value>, String> {
            Ok(focus.to_vec())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl MessageEventHandler for FailingHandler {
        async fn handle(
            &self,
            _event: &str,
            _focus: &[Value],
            _bundle: &Value,
        ) -> Result<Vec<Value>, String> {
            Err("downstream unavailable".to_string())
        }
    }

    fn admit_bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "message",
            "entry": [
                {
                    "fullUrl": "urn:uuid:header",
                    "resource": {
                        "resourceType": "MessageHeader",
                        "id": "mh1",
                        "eventCoding": {"system": "http://example.org/events", "code": "admit"},
                        "source": {"name": "test"},
                        "focus": [{"reference": "urn:uuid:patient"}]
                    }
                },
                {
                    "fullUrl": "urn:uuid:patient",
                    "resource": {"resourceType": "Patient", "id": "p1"}
                }
            ]
        })
    }

    #[tokio::test]
    async fn test_dispatch_with_focus() {
        let registry = MessageRegistry::new();
        registry.register("admit", Arc::new(EchoHandler));

        let response = process(&registry, &admit_bundle()).await.unwrap();
        assert_eq!(response["type"], "message");

        let entries = response["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["resource"]["resourceType"], "MessageHeader");
        assert_eq!(entries[0]["resource"]["response"]["code"], "ok");
        assert_eq!(entries[0]["resource"]["response"]["identifier"], "mh1");
        // the echoed focus patient rides along with a computed fullUrl
        assert_eq!(entries[1]["resource"]["id"], "p1");
        assert_eq!(entries[1]["fullUrl"], "Patient/p1");
    }

    #[tokio::test]
    async fn test_missing_handler_is_fatal_error() {
        let registry = MessageRegistry::new();
        let response = process(&registry, &admit_bundle()).await.unwrap();

        let entries = response["entry"].as_array().unwrap();
        assert_eq!(entries[0]["resource"]["response"]["code"], "fatal-error");
        assert_eq!(entries[1]["resource"]["resourceType"], "OperationOutcome");
    }

    #[tokio::test]
    async fn test_handler_error_is_fatal_error() {
        let registry = MessageRegistry::new();
        registry.register("admit", Arc::new(FailingHandler));

        let response = process(&registry, &admit_bundle()).await.unwrap();
        let entries = response["entry"].as_array().unwrap();
        assert_eq!(entries[0]["resource"]["response"]["code"], "fatal-error");
        assert!(entries[1]["resource"]["issue"][0]["diagnostics"]
            .as_str()
            .unwrap()
            .contains("downstream unavailable"));
    }

    #[tokio::test]
    async fn test_event_uri_fallback() {
        let registry = MessageRegistry::new();
        registry.register("http://example.org/events/transfer", Arc::new(EchoHandler));

        let bundle = json!({
            "resourceType": "Bundle",
            "type": "message",
            "entry": [{
                "resource": {
                    "resourceType": "MessageHeader",
                    "eventUri": "http://example.org/events/transfer",
                    "source": {"name": "test"}
                }
            }]
        });
        let response = process(&registry, &bundle).await.unwrap();
        assert_eq!(response["entry"][0]["resource"]["response"]["code"], "ok");
    }

    #[tokio::test]
    async fn test_rejects_malformed_bundles() {
        let registry = MessageRegistry::new();

        let not_message = json!({"resourceType": "Bundle", "type": "batch", "entry": [{}]});
        assert!(process(&registry, &not_message).await.is_err());

        let empty = json!({"resourceType": "Bundle", "type": "message", "entry": []});
        assert!(process(&registry, &empty).await.is_err());

        let wrong_first = json!({
            "resourceType": "Bundle",
            "type": "message",
            "entry": [{"resource": {"resourceType": "Patient"}}]
        });
        assert!(process(&registry, &wrong_first).await.is_err());
    }
}
