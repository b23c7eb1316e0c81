//! Custom search-parameter model and registry.
//!
//! The server registers host-defined SearchParameters at runtime; the
//! capability builder folds them into the emitted CapabilityStatement.

use crate::error::{PlatformError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// FHIR search parameter types the platform advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    Token,
    String,
    Date,
    Reference,
    Number,
    Uri,
    Quantity,
}

impl SearchParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::String => "string",
            Self::Date => "date",
            Self::Reference => "reference",
            Self::Number => "number",
            Self::Uri => "uri",
            Self::Quantity => "quantity",
        }
    }
}

/// A host-registered search parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomSearchParam {
    pub name: String,
    /// Resource type the parameter applies to
    pub resource_type: String,
    #[serde(rename = "type")]
    pub param_type: SearchParamType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Mutable registry of custom search parameters, keyed by resource type.
#[derive(Debug, Clone, Default)]
pub struct CustomSearchParamRegistry {
    by_type: HashMap<String, Vec<CustomSearchParam>>,
}

impl CustomSearchParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter. A parameter with the same (type, name) replaces
    /// the prior registration.
    pub fn add(&mut self, param: CustomSearchParam) {
        let params = self.by_type.entry(param.resource_type.clone()).or_default();
        if let Some(existing) = params.iter_mut().find(|p| p.name == param.name) {
            *existing = param;
        } else {
            params.push(param);
        }
    }

    /// Parameters registered for one resource type, in registration order.
    pub fn list(&self, resource_type: &str) -> Vec<CustomSearchParam> {
        self.by_type.get(resource_type).cloned().unwrap_or_default()
    }

    /// All registered parameters, grouped by resource type sorted by name.
    pub fn list_all(&self) -> Vec<CustomSearchParam> {
        let mut types: Vec<&String> = self.by_type.keys().collect();
        types.sort();
        types
            .into_iter()
            .flat_map(|t| self.by_type[t].iter().cloned())
            .collect()
    }

    /// Remove a parameter; errors when it was never registered.
    pub fn delete(&mut self, resource_type: &str, name: &str) -> Result<()> {
        let params = self.by_type.get_mut(resource_type).ok_or_else(|| {
            PlatformError::NotFound(format!(
                "no custom search parameters registered for {}",
                resource_type
            ))
        })?;
        let before = params.len();
        params.retain(|p| p.name != name);
        if params.len() == before {
            return Err(PlatformError::NotFound(format!(
                "custom search parameter {}/{} is not registered",
                resource_type, name
            )));
        }
        if params.is_empty() {
            self.by_type.remove(resource_type);
        }
        Ok(())
    }
}
