//! `Composition/$document`: transitive reference collection and document
//! Bundle assembly.

use crate::error::{PlatformError, Result};
use crate::resource::local_reference;
use serde_json::{Value, json};

/// Validate the source Composition carries the document-required fields.
pub fn validate_composition(composition: &Value) -> Result<()> {
    if composition.get("resourceType").and_then(|v| v.as_str()) != Some("Composition") {
        return Err(PlatformError::Structure(
            "resourceType must be 'Composition'".to_string(),
        ));
    }
    for field in ["status", "type", "date", "author", "title"] {
        if composition.get(field).is_none() {
            return Err(PlatformError::Required(format!("Composition.{}", field)));
        }
    }
    Ok(())
}

/// Collect every reference reachable from the Composition, in document
/// order: subject, authors, custodian, encounter, attesters, then each
/// section's entries and authors followed by its nested sections.
/// Duplicates keep their first occurrence.
pub fn collect_references(composition: &Value) -> Vec<String> {
    let mut references = Vec::new();

    push_reference(&mut references, composition.get("subject"));
    if let Some(authors) = composition.get("author").and_then(|v| v.as_array()) {
        for author in authors {
            push_reference(&mut references, Some(author));
        }
    }
    push_reference(&mut references, composition.get("custodian"));
    push_reference(&mut references, composition.get("encounter"));
    if let Some(attesters) = composition.get("attester").and_then(|v| v.as_array()) {
        for attester in attesters {
            push_reference(&mut references, attester.get("party"));
        }
    }
    if let Some(sections) = composition.get("section").and_then(|v| v.as_array()) {
        for section in sections {
            collect_section(section, &mut references);
        }
    }
    references
}

fn collect_section(section: &Value, references: &mut Vec<String>) {
    if let Some(entries) = section.get("entry").and_then(|v| v.as_array()) {
        for entry in entries {
            push_reference(references, Some(entry));
        }
    }
    if let Some(authors) = section.get("author").and_then(|v| v.as_array()) {
        for author in authors {
            push_reference(references, Some(author));
        }
    }
    if let Some(nested) = section.get("section").and_then(|v| v.as_array()) {
        for child in nested {
            collect_section(child, references);
        }
    }
}

fn push_reference(references: &mut Vec<String>, value: Option<&Value>) {
    if let Some(reference) = value
        .and_then(|v| v.get("reference"))
        .and_then(|v| v.as_str())
        && !reference.is_empty()
        && !references.iter().any(|r| r == reference)
    {
        references.push(reference.to_string());
    }
}

/// Assemble the document Bundle: the Composition first, then each resolved
/// resource exactly once.
pub fn build_document_bundle(composition: Value, resolved: Vec<Value>) -> Value {
    let mut entries = Vec::with_capacity(resolved.len() + 1);
    let mut seen = Vec::new();

    let composition_url = local_reference(&composition);
    seen.push(composition_url.clone());
    entries.push(json!({
        "fullUrl": composition_url,
        "resource": composition,
    }));

    for resource in resolved {
        let full_url = local_reference(&resource);
        if seen.contains(&full_url) {
            continue;
        }
        seen.push(full_url.clone());
        entries.push(json!({
            "fullUrl": full_url,
            "resource": resource,
        }));
    }

    json!({
        "resourceType": "Bundle",
        "type": "document",
        "identifier": {
            "system": "urn:ietf:rfc:3986",
            "value": format!("urn:uuid:{}", uuid::Uuid::new_v4()),
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "entry": entries,
    })
}
