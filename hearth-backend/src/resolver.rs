//! Read-side seams: reference resolution for `$document` and message
//! focus handling, and the typed-search delegate behind compartment search.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Resolves a local reference (`Patient/p1`) to the referenced resource.
/// Unresolvable references yield `None`, not an error.
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<Option<Value>>;
}

/// Host-supplied typed search; the platform forwards compartment queries
/// here with a `patient` parameter pinned.
#[async_trait]
pub trait SearchDelegate: Send + Sync {
    async fn search(
        &self,
        resource_type: &str,
        parameters: &[(String, String)],
    ) -> Result<Vec<Value>>;
}
