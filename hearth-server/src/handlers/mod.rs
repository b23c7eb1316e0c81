pub mod compartment;
pub mod document;
pub mod import;
pub mod metadata;
pub mod populate;
pub mod profiles;
pub mod translate;

use serde_json::Value;

/// Extract a named resource out of a FHIR Parameters wrapper.
pub fn parameters_resource(params: &Value, name: &str) -> Option<Value> {
    params
        .get("parameter")
        .and_then(|p| p.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|p| p.get("name").and_then(|n| n.as_str()) == Some(name))
        })
        .and_then(|p| p.get("resource"))
        .cloned()
}

/// Extract a named primitive value out of a FHIR Parameters wrapper,
/// whichever `value[x]` key it uses.
pub fn parameters_value(params: &Value, name: &str) -> Option<Value> {
    params
        .get("parameter")
        .and_then(|p| p.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|p| p.get("name").and_then(|n| n.as_str()) == Some(name))
        })
        .and_then(|p| {
            p.as_object()?
                .iter()
                .find(|(key, _)| key.starts_with("value"))
                .map(|(_, v)| v.clone())
        })
}
