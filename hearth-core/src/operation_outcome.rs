use serde::{Deserialize, Serialize};

/// FHIR OperationOutcome resource for error reporting
/// See: https://www.hl7.org/fhir/operationoutcome.html
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub issue: Vec<OperationOutcomeIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcomeIssue {
    pub severity: IssueSeverity,
    pub code: IssueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CodeableConcept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Invalid,
    Structure,
    Required,
    Value,
    Invariant,
    Security,
    Login,
    Unknown,
    Expired,
    Forbidden,
    Suppressed,
    Processing,
    NotSupported,
    Duplicate,
    MultipleMatches,
    NotFound,
    Deleted,
    TooLong,
    CodeInvalid,
    Extension,
    TooCostly,
    BusinessRule,
    Conflict,
    Transient,
    LockError,
    NoStore,
    Exception,
    Timeout,
    Incomplete,
    Throttled,
    Informational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coding: Option<Vec<Coding>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl OperationOutcomeIssue {
    pub fn new(severity: IssueSeverity, code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            diagnostics: Some(diagnostics.into()),
            details: None,
            expression: None,
            location: None,
        }
    }
}

impl OperationOutcome {
    /// Create an error OperationOutcome with a single issue
    pub fn error(code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self::from_issues(vec![OperationOutcomeIssue::new(
            IssueSeverity::Error,
            code,
            diagnostics,
        )])
    }

    /// Create an OperationOutcome from a prepared issue list
    pub fn from_issues(issues: Vec<OperationOutcomeIssue>) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            id: None,
            issue: issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::validation;
    use serde_json::json;

    #[test]
    fn test_bundle_engine_error_shape() {
        // the shape the Bundle engine reports a failed entry with
        let outcome = OperationOutcome::error(
            IssueType::Processing,
            "transaction failed at entry[1]: update requires a resource body",
        );
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("OperationOutcome"));
        assert!(json.contains("\"severity\":\"error\""));
        assert!(json.contains("\"code\":\"processing\""));
        assert!(json.contains("entry[1]"));
    }

    #[test]
    fn test_platform_error_renders_through_to_outcome() {
        let outcome = PlatformError::NotFound("Patient/123".to_string()).to_outcome();
        assert_eq!(outcome.issue.len(), 1);
        assert_eq!(outcome.issue[0].severity, IssueSeverity::Error);
        assert_eq!(outcome.issue[0].code, IssueType::NotFound);
        assert!(outcome.issue[0]
            .diagnostics
            .as_ref()
            .unwrap()
            .contains("Patient/123"));

        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("not-found"));
    }

    #[test]
    fn test_validator_issue_list_aggregation() {
        // the structural validator funnels its findings through from_issues
        let observation = json!({
            "resourceType": "Observation",
            "code": {"coding": [{"code": "test"}]}
        });
        let outcome = validation::ensure_valid(&observation).unwrap_err();
        assert_eq!(outcome.resource_type, "OperationOutcome");
        assert_eq!(outcome.issue[0].code, IssueType::Required);
        assert_eq!(
            outcome.issue[0].expression.as_deref(),
            Some(["Observation.status".to_string()].as_slice())
        );

        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"code\":\"required\""));
        assert!(json.contains("Observation.status"));
    }

    #[test]
    fn test_from_issues_keeps_order() {
        let outcome = OperationOutcome::from_issues(vec![
            OperationOutcomeIssue::new(IssueSeverity::Error, IssueType::Required, "first"),
            OperationOutcomeIssue::new(IssueSeverity::Warning, IssueType::Value, "second"),
        ]);
        assert_eq!(outcome.issue.len(), 2);
        assert_eq!(outcome.issue[0].diagnostics.as_deref(), Some("first"));
        assert_eq!(outcome.issue[1].severity, IssueSeverity::Warning);
    }

    #[test]
    fn test_unset_issue_fields_are_omitted() {
        let outcome = OperationOutcome::error(IssueType::Value, "bad cursor");
        let serialized = serde_json::to_value(&outcome).unwrap();
        let issue = &serialized["issue"][0];
        assert!(issue.get("details").is_none());
        assert!(issue.get("expression").is_none());
        assert!(issue.get("location").is_none());
        assert!(serialized.get("id").is_none());
    }
}
