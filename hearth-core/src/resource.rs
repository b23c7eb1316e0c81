use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Core FHIR resource envelope.
///
/// Resources are open-schema JSON; only the top-level fields the platform
/// cares about are typed. Everything else rides along in `rest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "resourceType")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    /// All other fields are stored here
    #[serde(flatten)]
    pub rest: Value,
}

/// FHIR resource metadata
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Meta {
    #[serde(rename = "versionId", skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    #[serde(rename = "lastUpdated", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<String>>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: None,
            meta: None,
            rest: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// `resourceType` of a raw resource value, if present.
pub fn resource_type_of(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(|v| v.as_str())
}

/// `id` of a raw resource value, if present.
pub fn resource_id_of(resource: &Value) -> Option<&str> {
    resource.get("id").and_then(|v| v.as_str())
}

/// Local reference `<ResourceType>/<id>` for a raw resource value.
pub fn local_reference(resource: &Value) -> String {
    format!(
        "{}/{}",
        resource_type_of(resource).unwrap_or(""),
        resource_id_of(resource).unwrap_or("")
    )
}

/// Walk a dotted path through a JSON value, descending into the first
/// element of any intermediate array.
///
/// `walk_path(patient, "name.family")` resolves `patient.name[0].family`.
pub fn walk_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Array(arr) => arr.first()?.get(segment)?,
            _ => current.get(segment)?,
        };
    }
    Some(current)
}

/// True when a dotted path resolves to a present, non-empty element in any
/// branch of the value (arrays are searched element-wise).
pub fn path_exists(value: &Value, path: &str) -> bool {
    fn descend(value: &Value, segments: &[&str]) -> bool {
        let Some((head, tail)) = segments.split_first() else {
            return match value {
                Value::Null => false,
                Value::Array(arr) => !arr.is_empty(),
                Value::String(s) => !s.is_empty(),
                _ => true,
            };
        };
        match value {
            Value::Array(arr) => arr.iter().any(|item| descend(item, segments)),
            Value::Object(map) => map.get(*head).is_some_and(|next| descend(next, tail)),
            _ => false,
        }
    }
    descend(value, &path.split('.').collect::<Vec<_>>())
}

/// Collect every value a dotted path resolves to, fanning out over arrays.
pub fn path_values<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
    fn descend<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
        let Some((head, tail)) = segments.split_first() else {
            match value {
                Value::Array(arr) => out.extend(arr.iter()),
                Value::Null => {}
                other => out.push(other),
            }
            return;
        };
        match value {
            Value::Array(arr) => {
                for item in arr {
                    descend(item, segments, out);
                }
            }
            Value::Object(map) => {
                if let Some(next) = map.get(*head) {
                    descend(next, tail, out);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    descend(value, &path.split('.').collect::<Vec<_>>(), &mut out);
    out
}
