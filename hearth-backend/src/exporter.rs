//! Bulk export seams: per-type resource exporters, group membership
//! resolution, and a cancellation flag shared with export workers.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag handed to long-running work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Host-supplied exporter for one resource type.
#[async_trait]
pub trait ResourceExporter: Send + Sync {
    /// Every resource of the type, optionally limited to those updated
    /// since the given instant. Output order is preserved into NDJSON.
    async fn export_all(
        &self,
        cancel: &CancelToken,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>>;

    /// Resources of the type belonging to one patient compartment.
    async fn export_by_patient(
        &self,
        cancel: &CancelToken,
        patient_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>>;
}

/// Resolves a Group id to its member patient ids; unknown groups error.
#[async_trait]
pub trait GroupResolver: Send + Sync {
    async fn resolve_group(&self, group_id: &str) -> Result<Vec<String>>;
}
