//! In-memory backend implementing every platform seam.
//!
//! Scaffolding for tests and demos, not a product store: data lives in a
//! process-local map and transactions roll back by snapshot restore.

use crate::entry::{
    EntryMethod, EntryOutcome, EntryProcessor, EntryRequest, TransactionContext,
};
use crate::error::{BackendError, Result};
use crate::exporter::{CancelToken, GroupResolver, ResourceExporter};
use crate::resolver::{ReferenceResolver, SearchDelegate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_core::search_bundle::RevIncludeProvider;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

type Store = HashMap<String, BTreeMap<String, Value>>;

/// Shared in-memory resource store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    resources: Arc<Mutex<Store>>,
    groups: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a resource directly, stamping meta like a create would.
    pub fn insert(&self, resource_type: &str, id: &str, mut resource: Value) {
        stamp_meta(&mut resource, id, "1");
        self.resources
            .lock()
            .unwrap()
            .entry(resource_type.to_string())
            .or_default()
            .insert(id.to_string(), resource);
    }

    pub fn get(&self, resource_type: &str, id: &str) -> Option<Value> {
        self.resources
            .lock()
            .unwrap()
            .get(resource_type)
            .and_then(|by_id| by_id.get(id))
            .cloned()
    }

    pub fn count(&self, resource_type: &str) -> usize {
        self.resources
            .lock()
            .unwrap()
            .get(resource_type)
            .map(|by_id| by_id.len())
            .unwrap_or(0)
    }

    /// Register a Group's member patient ids.
    pub fn put_group(&self, group_id: &str, patient_ids: Vec<String>) {
        self.groups
            .lock()
            .unwrap()
            .insert(group_id.to_string(), patient_ids);
    }

    /// An exporter view over one resource type.
    pub fn exporter(&self, resource_type: &str) -> MemoryExporter {
        MemoryExporter {
            backend: self.clone(),
            resource_type: resource_type.to_string(),
        }
    }

    fn apply(&self, request: &EntryRequest) -> Result<EntryOutcome> {
        let mut store = self.resources.lock().unwrap();
        apply_to_store(&mut store, request)
    }
}

fn stamp_meta(resource: &mut Value, id: &str, version_id: &str) {
    if let Some(obj) = resource.as_object_mut() {
        obj.insert("id".to_string(), json!(id));
        obj.insert(
            "meta".to_string(),
            json!({
                "versionId": version_id,
                "lastUpdated": Utc::now().to_rfc3339(),
            }),
        );
    }
}

fn current_version(resource: &Value) -> i64 {
    resource
        .get("meta")
        .and_then(|m| m.get("versionId"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn apply_to_store(store: &mut Store, request: &EntryRequest) -> Result<EntryOutcome> {
    let resource_type = request.resource_type.as_str();
    match request.method {
        EntryMethod::Get => {
            let id = request.id.as_deref().ok_or_else(|| {
                BackendError::Invalid("read requires a resource id".to_string())
            })?;
            let resource = store
                .get(resource_type)
                .and_then(|by_id| by_id.get(id))
                .cloned()
                .ok_or_else(|| BackendError::NotFound {
                    resource_type: resource_type.to_string(),
                    id: id.to_string(),
                })?;
            let mut outcome = EntryOutcome::new("200 OK");
            outcome.resource = Some(resource);
            Ok(outcome)
        }
        EntryMethod::Post => {
            let mut resource = request.resource.clone().ok_or_else(|| {
                BackendError::Invalid("create requires a resource body".to_string())
            })?;
            let id = uuid::Uuid::new_v4().to_string();
            stamp_meta(&mut resource, &id, "1");
            store
                .entry(resource_type.to_string())
                .or_default()
                .insert(id.clone(), resource.clone());

            let mut outcome = EntryOutcome::new("201 Created");
            outcome.location = Some(format!("{}/{}/_history/1", resource_type, id));
            outcome.resource = Some(resource);
            Ok(outcome)
        }
        EntryMethod::Put => {
            let id = request.id.as_deref().ok_or_else(|| {
                BackendError::Invalid("update requires a resource id".to_string())
            })?;
            let mut resource = request.resource.clone().ok_or_else(|| {
                BackendError::Invalid("update requires a resource body".to_string())
            })?;

            let existing_version = store
                .get(resource_type)
                .and_then(|by_id| by_id.get(id))
                .map(current_version);

            if let Some(ref expected) = request.if_match {
                let actual = format!("W/\"{}\"", existing_version.unwrap_or(0));
                if *expected != actual {
                    return Err(BackendError::Conflict(format!(
                        "If-Match {} does not match current version {}",
                        expected, actual
                    )));
                }
            }

            let (status, version) = match existing_version {
                Some(current) => ("200 OK", (current + 1).to_string()),
                None => ("201 Created", "1".to_string()),
            };
            stamp_meta(&mut resource, id, &version);
            store
                .entry(resource_type.to_string())
                .or_default()
                .insert(id.to_string(), resource.clone());

            let mut outcome = EntryOutcome::new(status);
            outcome.location = Some(format!("{}/{}/_history/{}", resource_type, id, version));
            outcome.resource = Some(resource);
            Ok(outcome)
        }
        EntryMethod::Patch => {
            let id = request.id.as_deref().ok_or_else(|| {
                BackendError::Invalid("patch requires a resource id".to_string())
            })?;
            let patch = request.resource.clone().ok_or_else(|| {
                BackendError::Invalid("patch requires a body".to_string())
            })?;
            let by_id = store.get_mut(resource_type).ok_or_else(|| {
                BackendError::NotFound {
                    resource_type: resource_type.to_string(),
                    id: id.to_string(),
                }
            })?;
            let existing = by_id.get_mut(id).ok_or_else(|| BackendError::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            })?;

            let version = (current_version(existing) + 1).to_string();
            if let (Some(target), Some(changes)) = (existing.as_object_mut(), patch.as_object()) {
                for (key, value) in changes {
                    if key != "id" && key != "resourceType" && key != "meta" {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
            stamp_meta(existing, id, &version);

            let mut outcome = EntryOutcome::new("200 OK");
            outcome.location = Some(format!("{}/{}/_history/{}", resource_type, id, version));
            outcome.resource = Some(existing.clone());
            Ok(outcome)
        }
        EntryMethod::Delete => {
            let id = request.id.as_deref().ok_or_else(|| {
                BackendError::Invalid("delete requires a resource id".to_string())
            })?;
            if let Some(by_id) = store.get_mut(resource_type) {
                by_id.remove(id);
            }
            Ok(EntryOutcome::new("204 No Content"))
        }
    }
}

#[async_trait]
impl EntryProcessor for MemoryBackend {
    async fn process(&self, request: &EntryRequest) -> Result<EntryOutcome> {
        self.apply(request)
    }

    async fn begin(&self) -> Result<Box<dyn TransactionContext>> {
        let snapshot = self.resources.lock().unwrap().clone();
        Ok(Box::new(MemoryTransaction {
            backend: self.clone(),
            snapshot,
        }))
    }
}

/// Snapshot transaction: rollback restores the store as it was at `begin`.
pub struct MemoryTransaction {
    backend: MemoryBackend,
    snapshot: Store,
}

#[async_trait]
impl TransactionContext for MemoryTransaction {
    async fn process(&mut self, request: &EntryRequest) -> Result<EntryOutcome> {
        self.backend.apply(request)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        tracing::debug!("memory transaction rolled back");
        *self.backend.resources.lock().unwrap() = self.snapshot;
        Ok(())
    }
}

/// Exporter over one resource type of a [`MemoryBackend`].
pub struct MemoryExporter {
    backend: MemoryBackend,
    resource_type: String,
}

fn updated_since(resource: &Value, since: Option<DateTime<Utc>>) -> bool {
    let Some(since) = since else { return true };
    resource
        .get("meta")
        .and_then(|m| m.get("lastUpdated"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .is_none_or(|updated| updated.with_timezone(&Utc) >= since)
}

fn references_patient(resource: &Value, patient_ref: &str) -> bool {
    for field in ["subject", "patient"] {
        if resource
            .get(field)
            .and_then(|r| r.get("reference"))
            .and_then(|v| v.as_str())
            == Some(patient_ref)
        {
            return true;
        }
    }
    false
}

#[async_trait]
impl ResourceExporter for MemoryExporter {
    async fn export_all(
        &self,
        cancel: &CancelToken,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let store = self.backend.resources.lock().unwrap();
        Ok(store
            .get(&self.resource_type)
            .map(|by_id| {
                by_id
                    .values()
                    .filter(|r| updated_since(r, since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn export_by_patient(
        &self,
        cancel: &CancelToken,
        patient_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let patient_ref = format!("Patient/{}", patient_id);
        let store = self.backend.resources.lock().unwrap();
        Ok(store
            .get(&self.resource_type)
            .map(|by_id| {
                by_id
                    .iter()
                    .filter(|(id, resource)| {
                        if self.resource_type == "Patient" {
                            id.as_str() == patient_id
                        } else {
                            references_patient(resource, &patient_ref)
                        }
                    })
                    .filter(|(_, r)| updated_since(r, since))
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl GroupResolver for MemoryBackend {
    async fn resolve_group(&self, group_id: &str) -> Result<Vec<String>> {
        self.groups
            .lock()
            .unwrap()
            .get(group_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                resource_type: "Group".to_string(),
                id: group_id.to_string(),
            })
    }
}

#[async_trait]
impl ReferenceResolver for MemoryBackend {
    async fn resolve(&self, reference: &str) -> Result<Option<Value>> {
        let Some((resource_type, id)) = reference.split_once('/') else {
            return Ok(None);
        };
        Ok(self.get(resource_type, id))
    }
}

#[async_trait]
impl SearchDelegate for MemoryBackend {
    async fn search(
        &self,
        resource_type: &str,
        parameters: &[(String, String)],
    ) -> Result<Vec<Value>> {
        let store = self.resources.lock().unwrap();
        let Some(by_id) = store.get(resource_type) else {
            return Ok(Vec::new());
        };
        Ok(by_id
            .values()
            .filter(|resource| parameters.iter().all(|(name, value)| {
                matches_parameter(resource, name, value)
            }))
            .cloned()
            .collect())
    }
}

fn matches_parameter(resource: &Value, name: &str, value: &str) -> bool {
    match name {
        "_id" => resource.get("id").and_then(|v| v.as_str()) == Some(value),
        "patient" | "subject" => {
            let target = if value.contains('/') {
                value.to_string()
            } else {
                format!("Patient/{}", value)
            };
            references_patient(resource, &target)
        }
        _ => match resource.get(name) {
            Some(Value::String(s)) => s == value,
            Some(other) => other.to_string() == value,
            None => false,
        },
    }
}

impl RevIncludeProvider for MemoryBackend {
    fn find_by_targets(&self, targets: &[String]) -> Vec<Value> {
        let store = self.resources.lock().unwrap();
        let mut found = Vec::new();
        for by_id in store.values() {
            for resource in by_id.values() {
                if targets.iter().any(|t| references_patient(resource, t)) {
                    found.push(resource.clone());
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(resource_type: &str, resource: Value) -> EntryRequest {
        EntryRequest {
            method: EntryMethod::Post,
            resource_type: resource_type.to_string(),
            id: None,
            query: None,
            resource: Some(resource),
            if_match: None,
            if_none_exist: None,
        }
    }

    fn put(resource_type: &str, id: &str, resource: Value) -> EntryRequest {
        EntryRequest {
            method: EntryMethod::Put,
            resource_type: resource_type.to_string(),
            id: Some(id.to_string()),
            query: None,
            resource: Some(resource),
            if_match: None,
            if_none_exist: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let backend = MemoryBackend::new();
        let outcome = backend
            .process(&post("Patient", json!({"resourceType": "Patient"})))
            .await
            .unwrap();
        assert_eq!(outcome.status, "201 Created");
        let created = outcome.resource.unwrap();
        let id = created["id"].as_str().unwrap();
        assert_eq!(created["meta"]["versionId"], "1");
        assert!(backend.get("Patient", id).is_some());
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let backend = MemoryBackend::new();
        backend.insert("Patient", "p1", json!({"resourceType": "Patient"}));

        let outcome = backend
            .process(&put("Patient", "p1", json!({"resourceType": "Patient", "gender": "male"})))
            .await
            .unwrap();
        assert_eq!(outcome.status, "200 OK");
        assert_eq!(outcome.resource.unwrap()["meta"]["versionId"], "2");
    }

    #[tokio::test]
    async fn test_put_as_create() {
        let backend = MemoryBackend::new();
        let outcome = backend
            .process(&put("Patient", "new", json!({"resourceType": "Patient"})))
            .await
            .unwrap();
        assert_eq!(outcome.status, "201 Created");
    }

    #[tokio::test]
    async fn test_if_match_conflict() {
        let backend = MemoryBackend::new();
        backend.insert("Patient", "p1", json!({"resourceType": "Patient"}));

        let mut request = put("Patient", "p1", json!({"resourceType": "Patient"}));
        request.if_match = Some("W/\"7\"".to_string());
        let err = backend.process(&request).await.unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_transaction_rollback_restores_store() {
        let backend = MemoryBackend::new();
        backend.insert("Patient", "keep", json!({"resourceType": "Patient"}));

        let mut tx = backend.begin().await.unwrap();
        tx.process(&post("Patient", json!({"resourceType": "Patient"})))
            .await
            .unwrap();
        tx.process(&EntryRequest {
            method: EntryMethod::Delete,
            resource_type: "Patient".to_string(),
            id: Some("keep".to_string()),
            query: None,
            resource: None,
            if_match: None,
            if_none_exist: None,
        })
        .await
        .unwrap();

        assert_eq!(backend.count("Patient"), 1);
        tx.rollback().await.unwrap();
        assert_eq!(backend.count("Patient"), 1);
        assert!(backend.get("Patient", "keep").is_some());
    }

    #[tokio::test]
    async fn test_exporter_filters_by_patient() {
        let backend = MemoryBackend::new();
        backend.insert("Patient", "p1", json!({"resourceType": "Patient"}));
        backend.insert(
            "Observation",
            "o1",
            json!({"resourceType": "Observation", "subject": {"reference": "Patient/p1"}}),
        );
        backend.insert(
            "Observation",
            "o2",
            json!({"resourceType": "Observation", "subject": {"reference": "Patient/other"}}),
        );

        let cancel = CancelToken::new();
        let all = backend
            .exporter("Observation")
            .export_all(&cancel, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let scoped = backend
            .exporter("Observation")
            .export_by_patient(&cancel, "p1", None)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0]["id"], "o1");
    }

    #[tokio::test]
    async fn test_exporter_cancellation() {
        let backend = MemoryBackend::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = backend
            .exporter("Patient")
            .export_all(&cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Cancelled));
    }

    #[tokio::test]
    async fn test_group_resolver() {
        let backend = MemoryBackend::new();
        backend.put_group("g1", vec!["p1".to_string(), "p2".to_string()]);

        assert_eq!(backend.resolve_group("g1").await.unwrap().len(), 2);
        assert!(backend.resolve_group("unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_reference_resolver() {
        let backend = MemoryBackend::new();
        backend.insert("Patient", "p1", json!({"resourceType": "Patient"}));

        assert!(backend.resolve("Patient/p1").await.unwrap().is_some());
        assert!(backend.resolve("Patient/nope").await.unwrap().is_none());
        assert!(backend.resolve("garbage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_delegate_patient_parameter() {
        let backend = MemoryBackend::new();
        backend.insert(
            "Observation",
            "o1",
            json!({"resourceType": "Observation", "subject": {"reference": "Patient/p1"}, "status": "final"}),
        );
        backend.insert(
            "Observation",
            "o2",
            json!({"resourceType": "Observation", "subject": {"reference": "Patient/p2"}, "status": "final"}),
        );

        let results = backend
            .search(
                "Observation",
                &[
                    ("patient".to_string(), "p1".to_string()),
                    ("status".to_string(), "final".to_string()),
                ],
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["id"], "o1");
    }
}
