//! Profile engine: StructureDefinition-shaped constraint registry.
//!
//! Profiles are layered constraint sets over a base resource type. The
//! registry is process-wide and mutable; the validator in
//! [`validator`] checks resources against registered definitions.

pub mod validator;

use crate::error::{PlatformError, Result};
use serde_json::{Value, json};
use std::collections::HashMap;

/// One element constraint taken from a StructureDefinition element.
#[derive(Debug, Clone, Default)]
pub struct ProfileConstraint {
    /// Element path, e.g. `Patient.identifier`
    pub path: String,
    pub min: u32,
    pub max: Option<String>,
    pub must_support: bool,
    /// Literal fixed/pattern value the element must carry when present
    pub fixed_value: Option<Value>,
    pub description: Option<String>,
}

/// A registered profile.
#[derive(Debug, Clone)]
pub struct ProfileDefinition {
    pub url: String,
    pub name: String,
    /// Base resource type the profile constrains
    pub resource_type: String,
    pub version: String,
    pub status: String,
    pub constraints: Vec<ProfileConstraint>,
}

impl ProfileDefinition {
    /// Parse a FHIR StructureDefinition into a profile definition.
    ///
    /// Reads `differential.element` (falling back to `snapshot.element`) and
    /// keeps min/max cardinality, mustSupport flags, and literal
    /// `fixed[x]`/`pattern[x]` values.
    pub fn from_structure_definition(definition: &Value) -> Result<Self> {
        if definition.get("resourceType").and_then(|v| v.as_str()) != Some("StructureDefinition") {
            return Err(PlatformError::Structure(
                "resourceType must be 'StructureDefinition'".to_string(),
            ));
        }
        let url = definition
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PlatformError::Required("StructureDefinition.url".to_string()))?;
        let resource_type = definition
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PlatformError::Required("StructureDefinition.type".to_string()))?;

        let mut constraints = Vec::new();
        if let Some(elements) = definition
            .get("differential")
            .or_else(|| definition.get("snapshot"))
            .and_then(|d| d.get("element"))
            .and_then(|e| e.as_array())
        {
            for element in elements {
                let Some(path) = element.get("path").and_then(|v| v.as_str()) else {
                    continue;
                };
                // The root element repeats the type itself; it carries no constraint.
                if !path.contains('.') {
                    continue;
                }
                let fixed_value = element
                    .as_object()
                    .and_then(|map| {
                        map.iter().find(|(key, _)| {
                            key.starts_with("fixed") || key.starts_with("pattern")
                        })
                    })
                    .map(|(_, v)| v.clone());
                constraints.push(ProfileConstraint {
                    path: path.to_string(),
                    min: element.get("min").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                    max: element.get("max").and_then(|v| v.as_str()).map(|s| s.to_string()),
                    must_support: element
                        .get("mustSupport")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                    fixed_value,
                    description: element
                        .get("short")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                });
            }
        }

        Ok(Self {
            url: url.to_string(),
            name: definition
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or(resource_type)
                .to_string(),
            resource_type: resource_type.to_string(),
            version: definition
                .get("version")
                .and_then(|v| v.as_str())
                .unwrap_or("1.0.0")
                .to_string(),
            status: definition
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("active")
                .to_string(),
            constraints,
        })
    }

    /// Emit this profile as a FHIR StructureDefinition.
    pub fn to_structure_definition(&self) -> Value {
        let elements: Vec<Value> = self
            .constraints
            .iter()
            .map(|c| {
                let mut element = json!({
                    "path": c.path,
                    "min": c.min,
                });
                if let Some(ref max) = c.max {
                    element["max"] = json!(max);
                }
                if c.must_support {
                    element["mustSupport"] = json!(true);
                }
                if let Some(ref fixed) = c.fixed_value {
                    element["patternCodeableConcept"] = fixed.clone();
                }
                if let Some(ref short) = c.description {
                    element["short"] = json!(short);
                }
                element
            })
            .collect();

        json!({
            "resourceType": "StructureDefinition",
            "url": self.url,
            "name": self.name,
            "version": self.version,
            "status": self.status,
            "kind": "resource",
            "abstract": false,
            "type": self.resource_type,
            "baseDefinition": format!(
                "http://hl7.org/fhir/StructureDefinition/{}",
                self.resource_type
            ),
            "derivation": "constraint",
            "differential": {"element": elements},
        })
    }
}

/// Mutable registry of profiles, indexed by URL and by base resource type.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    by_url: HashMap<String, ProfileDefinition>,
    by_type: HashMap<String, Vec<String>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in US Core style profiles.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for profile in builtin_profiles() {
            registry.register(profile);
        }
        registry
    }

    /// Register a profile. A duplicate URL overwrites the prior definition;
    /// the type index keeps exactly one entry per (url, type) pair.
    pub fn register(&mut self, profile: ProfileDefinition) {
        tracing::debug!(url = %profile.url, resource_type = %profile.resource_type, "profile registered");
        if let Some(previous) = self.by_url.get(&profile.url)
            && previous.resource_type != profile.resource_type
            && let Some(urls) = self.by_type.get_mut(&previous.resource_type)
        {
            urls.retain(|u| u != &profile.url);
        }
        let urls = self.by_type.entry(profile.resource_type.clone()).or_default();
        if !urls.contains(&profile.url) {
            urls.push(profile.url.clone());
        }
        self.by_url.insert(profile.url.clone(), profile);
    }

    pub fn get(&self, url: &str) -> Option<&ProfileDefinition> {
        self.by_url.get(url)
    }

    /// Profiles constraining one resource type, in registration order.
    pub fn for_type(&self, resource_type: &str) -> Vec<&ProfileDefinition> {
        self.by_type
            .get(resource_type)
            .map(|urls| urls.iter().filter_map(|u| self.by_url.get(u)).collect())
            .unwrap_or_default()
    }

    /// All registered profiles, sorted by URL.
    pub fn list(&self) -> Vec<&ProfileDefinition> {
        let mut profiles: Vec<&ProfileDefinition> = self.by_url.values().collect();
        profiles.sort_by(|a, b| a.url.cmp(&b.url));
        profiles
    }
}

/// Built-in profiles modeled on US Core.
fn builtin_profiles() -> Vec<ProfileDefinition> {
    let must = |path: &str| ProfileConstraint {
        path: path.to_string(),
        must_support: true,
        ..ProfileConstraint::default()
    };
    vec![
        ProfileDefinition {
            url: "http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient".to_string(),
            name: "USCorePatientProfile".to_string(),
            resource_type: "Patient".to_string(),
            version: "6.1.0".to_string(),
            status: "active".to_string(),
            constraints: vec![
                ProfileConstraint {
                    path: "Patient.identifier".to_string(),
                    min: 1,
                    must_support: true,
                    ..ProfileConstraint::default()
                },
                ProfileConstraint {
                    path: "Patient.name".to_string(),
                    min: 1,
                    must_support: true,
                    ..ProfileConstraint::default()
                },
                ProfileConstraint {
                    path: "Patient.gender".to_string(),
                    min: 1,
                    must_support: true,
                    ..ProfileConstraint::default()
                },
                must("Patient.birthDate"),
                must("Patient.address"),
                must("Patient.telecom"),
                must("Patient.communication"),
            ],
        },
        ProfileDefinition {
            url: "http://hl7.org/fhir/us/core/StructureDefinition/us-core-observation-lab"
                .to_string(),
            name: "USCoreLaboratoryResultObservationProfile".to_string(),
            resource_type: "Observation".to_string(),
            version: "6.1.0".to_string(),
            status: "active".to_string(),
            constraints: vec![
                ProfileConstraint {
                    path: "Observation.status".to_string(),
                    min: 1,
                    must_support: true,
                    ..ProfileConstraint::default()
                },
                ProfileConstraint {
                    path: "Observation.category".to_string(),
                    min: 1,
                    must_support: true,
                    fixed_value: Some(json!({
                        "coding": [{
                            "system": "http://terminology.hl7.org/CodeSystem/observation-category",
                            "code": "laboratory",
                        }],
                    })),
                    ..ProfileConstraint::default()
                },
                ProfileConstraint {
                    path: "Observation.code".to_string(),
                    min: 1,
                    must_support: true,
                    ..ProfileConstraint::default()
                },
                must("Observation.subject"),
                must("Observation.effectiveDateTime"),
                must("Observation.valueQuantity"),
            ],
        },
    ]
}
