//! CapabilityStatement builder.
//!
//! Holds a mutable model of server capabilities and emits a canonical
//! CapabilityStatement snapshot. Repeated registrations for the same
//! resource type merge: interactions and search parameters are
//! set-unioned, supported profiles deduplicated. All mutators and `build`
//! are internally serialized.

use crate::search_param::{CustomSearchParam, CustomSearchParamRegistry};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;

const DEFAULT_FHIR_VERSION: &str = "4.0.1";
const IMPLEMENTATION_DESCRIPTION: &str = "Headless EHR FHIR R4 Server";
const OAUTH_URIS_EXTENSION: &str =
    "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris";

/// A server-level or resource-level operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOperation {
    pub name: String,
    pub definition: String,
}

/// Optional per-resource capability switches. Only non-empty/true values
/// appear in the emitted statement.
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    pub conditional_create: bool,
    pub conditional_update: bool,
    pub conditional_delete: Option<String>,
    pub read_history: bool,
    pub update_create: bool,
    pub patch_formats: Vec<String>,
    pub search_include: Vec<String>,
    pub search_rev_include: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct ResourceEntry {
    interactions: Vec<String>,
    search_params: Vec<(String, String)>,
    profiles: Vec<String>,
    operations: Vec<ServerOperation>,
    options: ResourceOptions,
}

#[derive(Debug, Default)]
struct Model {
    base_url: String,
    software_name: String,
    software_version: String,
    fhir_version: String,
    formats: Vec<String>,
    resources: HashMap<String, ResourceEntry>,
    server_operations: Vec<ServerOperation>,
    oauth_authorize: String,
    oauth_token: String,
    custom_params: CustomSearchParamRegistry,
}

/// Mutable capability model; `build` produces an immutable snapshot.
pub struct CapabilityBuilder {
    inner: Mutex<Model>,
}

impl CapabilityBuilder {
    pub fn new(base_url: impl Into<String>, software_version: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Model {
                base_url: base_url.into(),
                software_name: "hearth".to_string(),
                software_version: software_version.into(),
                fhir_version: DEFAULT_FHIR_VERSION.to_string(),
                formats: vec!["json".to_string()],
                ..Model::default()
            }),
        }
    }

    /// Override the advertised wire formats.
    pub fn set_formats(&self, formats: Vec<String>) {
        self.inner.lock().unwrap().formats = formats;
    }

    /// Register (or merge into) a resource type.
    pub fn add_resource(
        &self,
        resource_type: &str,
        interactions: &[&str],
        search_params: &[(&str, &str)],
    ) {
        self.add_resource_with_profiles(resource_type, interactions, search_params, &[]);
    }

    /// Register a resource type together with supported profiles.
    pub fn add_resource_with_profiles(
        &self,
        resource_type: &str,
        interactions: &[&str],
        search_params: &[(&str, &str)],
        profiles: &[&str],
    ) {
        let mut model = self.inner.lock().unwrap();
        let entry = model.resources.entry(resource_type.to_string()).or_default();
        for interaction in interactions {
            if !entry.interactions.iter().any(|i| i == interaction) {
                entry.interactions.push(interaction.to_string());
            }
        }
        for (name, param_type) in search_params {
            if !entry.search_params.iter().any(|(n, _)| n == name) {
                entry.search_params.push((name.to_string(), param_type.to_string()));
            }
        }
        for profile in profiles {
            if !entry.profiles.iter().any(|p| p == profile) {
                entry.profiles.push(profile.to_string());
            }
        }
    }

    /// Set optional capability switches; no-op when the type was never added.
    pub fn set_resource_capabilities(&self, resource_type: &str, options: ResourceOptions) {
        let mut model = self.inner.lock().unwrap();
        if let Some(entry) = model.resources.get_mut(resource_type) {
            entry.options = options;
        }
    }

    /// Attach an operation to a resource type; no-op when the type was never added.
    pub fn add_resource_operation(&self, resource_type: &str, operation: ServerOperation) {
        let mut model = self.inner.lock().unwrap();
        if let Some(entry) = model.resources.get_mut(resource_type)
            && !entry.operations.iter().any(|o| o.name == operation.name)
        {
            entry.operations.push(operation);
        }
    }

    /// Set the SMART OAuth endpoints advertised in `rest.security`.
    pub fn set_oauth_uris(&self, authorize: &str, token: &str) {
        let mut model = self.inner.lock().unwrap();
        model.oauth_authorize = authorize.to_string();
        model.oauth_token = token.to_string();
    }

    /// Register a server-level operation.
    pub fn add_server_operation(&self, operation: ServerOperation) {
        let mut model = self.inner.lock().unwrap();
        if !model.server_operations.iter().any(|o| o.name == operation.name) {
            model.server_operations.push(operation);
        }
    }

    pub fn add_custom_search_param(&self, param: CustomSearchParam) {
        self.inner.lock().unwrap().custom_params.add(param);
    }

    pub fn list_custom_search_params(&self, resource_type: &str) -> Vec<CustomSearchParam> {
        self.inner.lock().unwrap().custom_params.list(resource_type)
    }

    pub fn list_all_custom_search_params(&self) -> Vec<CustomSearchParam> {
        self.inner.lock().unwrap().custom_params.list_all()
    }

    pub fn delete_custom_search_param(
        &self,
        resource_type: &str,
        name: &str,
    ) -> crate::error::Result<()> {
        self.inner.lock().unwrap().custom_params.delete(resource_type, name)
    }

    /// Resource types currently in the model, sorted.
    pub fn resource_types(&self) -> Vec<String> {
        let model = self.inner.lock().unwrap();
        let mut types: Vec<String> = model.resources.keys().cloned().collect();
        types.sort();
        types
    }

    /// Emit the per-resource capability fragment, if the type is known.
    pub fn resource_capability(&self, resource_type: &str) -> Option<Value> {
        let model = self.inner.lock().unwrap();
        model
            .resources
            .get(resource_type)
            .map(|entry| emit_resource(resource_type, entry, &model.custom_params))
    }

    /// Server-level operations in registration order.
    pub fn server_operations(&self) -> Vec<ServerOperation> {
        self.inner.lock().unwrap().server_operations.clone()
    }

    /// Emit a CapabilityStatement snapshot of the current model.
    pub fn build(&self) -> Value {
        let model = self.inner.lock().unwrap();

        let mut types: Vec<&String> = model.resources.keys().collect();
        types.sort();
        let resources: Vec<Value> = types
            .iter()
            .map(|t| emit_resource(t, &model.resources[*t], &model.custom_params))
            .collect();

        let operations: Vec<Value> = model
            .server_operations
            .iter()
            .map(|op| json!({"name": op.name, "definition": op.definition}))
            .collect();

        let mut rest = json!({
            "mode": "server",
            "resource": resources,
            "interaction": [
                {"code": "transaction"},
                {"code": "batch"},
            ],
        });
        if !operations.is_empty() {
            rest["operation"] = json!(operations);
        }
        if let Some(security) = emit_security(&model.oauth_authorize, &model.oauth_token) {
            rest["security"] = security;
        }

        json!({
            "resourceType": "CapabilityStatement",
            "status": "active",
            "date": chrono::Utc::now().format("%Y-%m-%d").to_string(),
            "kind": "instance",
            "fhirVersion": model.fhir_version,
            "format": model.formats,
            "software": {
                "name": model.software_name,
                "version": model.software_version,
            },
            "implementation": {
                "description": IMPLEMENTATION_DESCRIPTION,
                "url": model.base_url,
            },
            "rest": [rest],
        })
    }
}

fn emit_resource(
    resource_type: &str,
    entry: &ResourceEntry,
    custom_params: &CustomSearchParamRegistry,
) -> Value {
    let interactions: Vec<Value> = entry
        .interactions
        .iter()
        .map(|code| json!({"code": code}))
        .collect();

    let mut seen: Vec<&str> = Vec::new();
    let mut search_params: Vec<Value> = Vec::new();
    for (name, param_type) in &entry.search_params {
        if !seen.contains(&name.as_str()) {
            seen.push(name.as_str());
            search_params.push(json!({"name": name, "type": param_type}));
        }
    }
    for custom in custom_params.list(resource_type) {
        if !seen.iter().any(|n| *n == custom.name) {
            search_params.push(json!({
                "name": custom.name,
                "type": custom.param_type.as_str(),
            }));
        }
    }

    let mut resource = json!({
        "type": resource_type,
        "interaction": interactions,
        "searchParam": search_params,
    });

    if !entry.profiles.is_empty() {
        resource["supportedProfile"] = json!(entry.profiles);
    }
    if !entry.operations.is_empty() {
        let ops: Vec<Value> = entry
            .operations
            .iter()
            .map(|op| json!({"name": op.name, "definition": op.definition}))
            .collect();
        resource["operation"] = json!(ops);
    }

    let options = &entry.options;
    if options.conditional_create {
        resource["conditionalCreate"] = json!(true);
    }
    if options.conditional_update {
        resource["conditionalUpdate"] = json!(true);
    }
    if let Some(ref mode) = options.conditional_delete {
        resource["conditionalDelete"] = json!(mode);
    }
    if options.read_history {
        resource["readHistory"] = json!(true);
    }
    if options.update_create {
        resource["updateCreate"] = json!(true);
    }
    if !options.patch_formats.is_empty() {
        resource["patchFormat"] = json!(options.patch_formats);
    }
    if !options.search_include.is_empty() {
        resource["searchInclude"] = json!(options.search_include);
    }
    if !options.search_rev_include.is_empty() {
        resource["searchRevInclude"] = json!(options.search_rev_include);
    }
    resource
}

fn emit_security(authorize: &str, token: &str) -> Option<Value> {
    if authorize.is_empty() && token.is_empty() {
        return None;
    }
    let mut uris: Vec<Value> = Vec::new();
    if !authorize.is_empty() {
        uris.push(json!({"url": "authorize", "valueUri": authorize}));
    }
    if !token.is_empty() {
        uris.push(json!({"url": "token", "valueUri": token}));
    }
    Some(json!({
        "extension": [{
            "url": OAUTH_URIS_EXTENSION,
            "extension": uris,
        }],
        "service": [{
            "coding": [{
                "system": "http://terminology.hl7.org/CodeSystem/restful-security-service",
                "code": "SMART-on-FHIR",
                "display": "SMART on FHIR",
            }],
        }],
    }))
}
