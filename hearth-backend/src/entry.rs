//! Per-entry Bundle processing seam.
//!
//! The Bundle engine parses entries and hands them here; the host supplies
//! the implementation that actually touches storage. Transactions go
//! through a [`TransactionContext`] so rollback can undo earlier entries.

use crate::error::{BackendError, Result};
use async_trait::async_trait;
use serde_json::{Value, json};

/// HTTP methods a Bundle entry may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl EntryMethod {
    pub fn parse(method: &str) -> Option<Self> {
        Some(match method {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// One parsed Bundle entry, ready for processing.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub method: EntryMethod,
    pub resource_type: String,
    pub id: Option<String>,
    /// Query string stripped from the request URL, if any
    pub query: Option<String>,
    pub resource: Option<Value>,
    pub if_match: Option<String>,
    pub if_none_exist: Option<String>,
}

/// What processing one entry produced.
#[derive(Debug, Clone)]
pub struct EntryOutcome {
    /// Full status line, e.g. `201 Created`
    pub status: String,
    pub location: Option<String>,
    pub resource: Option<Value>,
    pub last_modified: Option<String>,
}

impl EntryOutcome {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            location: None,
            resource: None,
            last_modified: None,
        }
    }

    /// Render this outcome as a Bundle response entry.
    pub fn to_response_entry(&self) -> Value {
        let mut response = json!({"status": self.status});
        if let Some(ref location) = self.location {
            response["location"] = json!(location);
        }
        if let Some(ref last_modified) = self.last_modified {
            response["lastModified"] = json!(last_modified);
        }
        let mut entry = json!({"response": response});
        if let Some(ref resource) = self.resource {
            entry["resource"] = resource.clone();
        }
        entry
    }
}

/// Host-supplied per-entry processor.
#[async_trait]
pub trait EntryProcessor: Send + Sync {
    /// Process one entry with no surrounding transaction (batch semantics).
    async fn process(&self, request: &EntryRequest) -> Result<EntryOutcome>;

    /// Open a transactional context (transaction semantics).
    async fn begin(&self) -> Result<Box<dyn TransactionContext>>;
}

/// A live transaction; dropping without commit must leave the backend
/// unchanged.
#[async_trait]
pub trait TransactionContext: Send {
    async fn process(&mut self, request: &EntryRequest) -> Result<EntryOutcome>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Scaffolding processor that rejects every entry. Wire a real backend
/// before serving traffic.
#[derive(Debug, Default)]
pub struct NoopEntryProcessor;

#[async_trait]
impl EntryProcessor for NoopEntryProcessor {
    async fn process(&self, request: &EntryRequest) -> Result<EntryOutcome> {
        Err(BackendError::Invalid(format!(
            "no entry processor configured for {} {}",
            request.method.as_str(),
            request.resource_type
        )))
    }

    async fn begin(&self) -> Result<Box<dyn TransactionContext>> {
        Err(BackendError::Other(
            "no entry processor configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse() {
        assert_eq!(EntryMethod::parse("POST"), Some(EntryMethod::Post));
        assert_eq!(EntryMethod::parse("DELETE"), Some(EntryMethod::Delete));
        assert_eq!(EntryMethod::parse("TRACE"), None);
        assert_eq!(EntryMethod::parse("post"), None);
    }

    #[test]
    fn test_outcome_response_entry() {
        let outcome = EntryOutcome {
            status: "201 Created".to_string(),
            location: Some("Patient/p1/_history/1".to_string()),
            resource: None,
            last_modified: Some("2024-06-01T00:00:00Z".to_string()),
        };
        let entry = outcome.to_response_entry();
        assert_eq!(entry["response"]["status"], "201 Created");
        assert_eq!(entry["response"]["location"], "Patient/p1/_history/1");
        assert_eq!(entry["response"]["lastModified"], "2024-06-01T00:00:00Z");
        assert!(entry.get("resource").is_none());
    }

    #[tokio::test]
    async fn test_noop_processor_rejects() {
        let processor = NoopEntryProcessor;
        let request = EntryRequest {
            method: EntryMethod::Post,
            resource_type: "Patient".to_string(),
            id: None,
            query: None,
            resource: None,
            if_match: None,
            if_none_exist: None,
        };
        assert!(processor.process(&request).await.is_err());
        assert!(processor.begin().await.is_err());
    }
}
