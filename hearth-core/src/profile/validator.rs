//! Profile validation: cardinality errors and MustSupport warnings.

use super::{ProfileDefinition, ProfileRegistry};
use crate::error::{PlatformError, Result};
use crate::resource::{path_exists, path_values, resource_type_of};
use serde::Serialize;
use serde_json::Value;

/// A single finding from profile validation.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileIssue {
    pub severity: ProfileIssueSeverity,
    pub code: ProfileIssueCode,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileIssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProfileIssueCode {
    #[serde(rename = "required")]
    Required,
    #[serde(rename = "mustSupport")]
    MustSupport,
    #[serde(rename = "fixedValue")]
    FixedValue,
}

/// Validate a resource against one registered profile URL.
///
/// Unknown URLs and base-type mismatches are errors; findings never mutate
/// the resource.
pub fn validate_against_profile(
    registry: &ProfileRegistry,
    url: &str,
    resource: &Value,
) -> Result<Vec<ProfileIssue>> {
    let profile = registry
        .get(url)
        .ok_or_else(|| PlatformError::NotFound(format!("profile not registered: {}", url)))?;

    let resource_type = resource_type_of(resource).unwrap_or("");
    if resource_type != profile.resource_type {
        return Err(PlatformError::Value(format!(
            "type mismatch: profile {} constrains {} but resource is {}",
            url, profile.resource_type, resource_type
        )));
    }

    Ok(check_profile(profile, resource))
}

/// Validate a resource against every profile registered for its type.
pub fn validate_resource(registry: &ProfileRegistry, resource: &Value) -> Vec<ProfileIssue> {
    let resource_type = resource_type_of(resource).unwrap_or("");
    registry
        .for_type(resource_type)
        .into_iter()
        .flat_map(|profile| check_profile(profile, resource))
        .collect()
}

fn check_profile(profile: &ProfileDefinition, resource: &Value) -> Vec<ProfileIssue> {
    let mut issues = Vec::new();
    for constraint in &profile.constraints {
        let relative = relative_path(&constraint.path, &profile.resource_type);
        let present = path_exists(resource, relative);

        if constraint.min >= 1 && !present {
            issues.push(ProfileIssue {
                severity: ProfileIssueSeverity::Error,
                code: ProfileIssueCode::Required,
                path: constraint.path.clone(),
                message: format!("{} is required by {}", constraint.path, profile.name),
            });
            continue;
        }

        if constraint.must_support && !present {
            issues.push(ProfileIssue {
                severity: ProfileIssueSeverity::Warning,
                code: ProfileIssueCode::MustSupport,
                path: constraint.path.clone(),
                message: format!(
                    "{} is marked MustSupport by {}",
                    constraint.path, profile.name
                ),
            });
            continue;
        }

        if present
            && let Some(ref fixed) = constraint.fixed_value
            && !fixed_value_satisfied(resource, relative, fixed)
        {
            issues.push(ProfileIssue {
                severity: ProfileIssueSeverity::Error,
                code: ProfileIssueCode::FixedValue,
                path: constraint.path.clone(),
                message: format!(
                    "{} does not carry the fixed value required by {}",
                    constraint.path, profile.name
                ),
            });
        }
    }
    issues
}

fn relative_path<'a>(path: &'a str, resource_type: &str) -> &'a str {
    path.strip_prefix(resource_type)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(path)
}

/// A fixed value is satisfied when any element at the path structurally
/// contains it: for objects every fixed key must be contained in the
/// candidate, with coding slices matched element-wise by subset.
fn fixed_value_satisfied(resource: &Value, path: &str, fixed: &Value) -> bool {
    path_values(resource, path)
        .iter()
        .any(|candidate| contains_value(candidate, fixed))
}

fn contains_value(candidate: &Value, fixed: &Value) -> bool {
    match (candidate, fixed) {
        (Value::Object(have), Value::Object(want)) => want
            .iter()
            .all(|(key, value)| have.get(key).is_some_and(|c| contains_value(c, value))),
        (Value::Array(have), Value::Array(want)) => want
            .iter()
            .all(|w| have.iter().any(|h| contains_value(h, w))),
        _ => candidate == fixed,
    }
}
