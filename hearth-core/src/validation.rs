//! Structural validation: required fields, simple type checks, cardinality.
//!
//! Validation results are plain issue lists; callers decide whether errors
//! abort the request or ride back inside a 200 OperationOutcome.

use crate::operation_outcome::{
    IssueSeverity, IssueType, OperationOutcome, OperationOutcomeIssue,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Registry of required fields per resource type (FHIR R4 base spec, min=1).
///
/// Data-driven — no hardcoded match. New resource types are added here.
static REQUIRED_FIELDS: LazyLock<HashMap<&str, &[&str]>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    // Patient: no required fields in base spec
    m.insert("Observation", ["status", "code"].as_slice());
    m.insert("Encounter", ["status", "class"].as_slice());
    m.insert("Condition", ["subject"].as_slice());
    m.insert("Task", ["status", "intent"].as_slice());
    m.insert("MedicationRequest", ["status", "intent", "subject"].as_slice());
    m.insert("Procedure", ["status", "subject"].as_slice());
    m.insert("AllergyIntolerance", ["patient"].as_slice());
    m.insert("DiagnosticReport", ["status", "code"].as_slice());
    m.insert("Immunization", ["status", "vaccineCode", "patient"].as_slice());
    m.insert("Bundle", ["type"].as_slice());
    m.insert("Composition", ["status", "type", "date", "author", "title"].as_slice());
    m.insert("MessageHeader", ["source"].as_slice());
    m.insert("Questionnaire", ["status"].as_slice());
    m.insert("QuestionnaireResponse", ["status"].as_slice());
    m.insert("ConceptMap", ["status"].as_slice());
    m.insert("StructureDefinition", ["url", "name", "status", "kind", "abstract", "type"].as_slice());
    m.insert("CarePlan", ["status", "intent", "subject"].as_slice());
    m.insert("DocumentReference", ["status", "content"].as_slice());
    m.insert("ServiceRequest", ["status", "intent", "subject"].as_slice());
    m
});

/// Fields whose values are code-bound in the base spec.
static CODE_FIELDS: LazyLock<HashMap<(&str, &str), &[&str]>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert(
        ("Patient", "gender"),
        ["male", "female", "other", "unknown"].as_slice(),
    );
    m.insert(
        ("Observation", "status"),
        [
            "registered", "preliminary", "final", "amended", "corrected", "cancelled",
            "entered-in-error", "unknown",
        ]
        .as_slice(),
    );
    m.insert(
        ("QuestionnaireResponse", "status"),
        ["in-progress", "completed", "amended", "entered-in-error", "stopped"].as_slice(),
    );
    m
});

/// Fields that must be arrays when present.
static ARRAY_FIELDS: LazyLock<HashMap<&str, &[&str]>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert("Patient", ["name", "identifier", "telecom", "address"].as_slice());
    m.insert("Bundle", ["entry", "link"].as_slice());
    m.insert("Composition", ["author", "section"].as_slice());
    m.insert("Questionnaire", ["item"].as_slice());
    m
});

/// Validate a resource's structure, returning the full issue list.
///
/// Warnings never block; callers treat the result as failed only when it
/// contains error-severity issues.
pub fn validate_structure(resource: &Value) -> Vec<OperationOutcomeIssue> {
    let mut issues = Vec::new();

    if !resource.is_object() {
        let mut issue = OperationOutcomeIssue::new(
            IssueSeverity::Error,
            IssueType::Structure,
            "Resource must be a JSON object",
        );
        issue.expression = Some(vec!["$".to_string()]);
        return vec![issue];
    }

    let resource_type = match resource.get("resourceType").and_then(|v| v.as_str()) {
        Some(rt) => rt,
        None => {
            let mut issue = OperationOutcomeIssue::new(
                IssueSeverity::Error,
                IssueType::Required,
                "Missing required field: resourceType",
            );
            issue.expression = Some(vec!["resourceType".to_string()]);
            return vec![issue];
        }
    };

    if let Some(fields) = REQUIRED_FIELDS.get(resource_type) {
        for field in *fields {
            if resource.get(*field).is_none() {
                let mut issue = OperationOutcomeIssue::new(
                    IssueSeverity::Error,
                    IssueType::Required,
                    format!("Missing required field: {}", field),
                );
                issue.expression = Some(vec![format!("{}.{}", resource_type, field)]);
                issues.push(issue);
            }
        }
    }

    for ((rt, field), allowed) in CODE_FIELDS.iter() {
        if *rt != resource_type {
            continue;
        }
        if let Some(value) = resource.get(*field).and_then(|v| v.as_str())
            && !allowed.contains(&value)
        {
            let mut issue = OperationOutcomeIssue::new(
                IssueSeverity::Error,
                IssueType::Value,
                format!("Invalid value for {}.{}: '{}'", rt, field, value),
            );
            issue.expression = Some(vec![format!("{}.{}", rt, field)]);
            issues.push(issue);
        }
    }

    if let Some(fields) = ARRAY_FIELDS.get(resource_type) {
        for field in *fields {
            if let Some(value) = resource.get(*field)
                && !value.is_array()
            {
                let mut issue = OperationOutcomeIssue::new(
                    IssueSeverity::Error,
                    IssueType::Structure,
                    format!("{}.{} must be an array", resource_type, field),
                );
                issue.expression = Some(vec![format!("{}.{}", resource_type, field)]);
                issues.push(issue);
            }
        }
    }

    check_identifier_quality(resource, resource_type, &mut issues);

    issues
}

/// Validate and fail on error-severity issues.
pub fn ensure_valid(resource: &Value) -> Result<(), OperationOutcome> {
    let issues = validate_structure(resource);
    let has_errors = issues
        .iter()
        .any(|i| matches!(i.severity, IssueSeverity::Error | IssueSeverity::Fatal));
    if has_errors {
        Err(OperationOutcome::from_issues(issues))
    } else {
        Ok(())
    }
}

/// Warn if identifiers lack both value and system.
fn check_identifier_quality(
    resource: &Value,
    resource_type: &str,
    issues: &mut Vec<OperationOutcomeIssue>,
) {
    if let Some(identifiers) = resource.get("identifier").and_then(|v| v.as_array()) {
        for (idx, identifier) in identifiers.iter().enumerate() {
            if identifier.get("value").is_none() && identifier.get("system").is_none() {
                let mut issue = OperationOutcomeIssue::new(
                    IssueSeverity::Warning,
                    IssueType::Value,
                    format!(
                        "Identifier at index {} should have either 'value' or 'system'",
                        idx
                    ),
                );
                issue.expression = Some(vec![format!("{}.identifier[{}]", resource_type, idx)]);
                issues.push(issue);
            }
        }
    }
}
