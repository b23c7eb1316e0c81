use crate::operation_outcome::{IssueType, OperationOutcome};
use thiserror::Error;

/// Platform error taxonomy.
///
/// Engines return these instead of raising; the HTTP layer renders each
/// variant as an OperationOutcome with the matching status code.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Malformed resource: {0}")]
    Structure(String),

    #[error("Missing required element: {0}")]
    Required(String),

    #[error("Invalid value: {0}")]
    Value(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMedia(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Internal error: {0}")]
    Exception(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl PlatformError {
    /// HTTP status code this error renders as.
    pub fn status(&self) -> u16 {
        match self {
            Self::Structure(_) | Self::Required(_) | Self::Value(_) | Self::Processing(_) => 400,
            Self::NotFound(_) => 404,
            Self::NotAcceptable(_) => 406,
            Self::UnsupportedMedia(_) => 415,
            Self::Conflict(_) => 409,
            Self::Exception(_) => 500,
            Self::InvalidJson(_) => 400,
        }
    }

    /// OperationOutcome issue code for this error.
    pub fn issue_type(&self) -> IssueType {
        match self {
            Self::Structure(_) | Self::InvalidJson(_) => IssueType::Structure,
            Self::Required(_) => IssueType::Required,
            Self::Value(_) => IssueType::Value,
            Self::NotFound(_) => IssueType::NotFound,
            Self::NotAcceptable(_) | Self::UnsupportedMedia(_) => IssueType::NotSupported,
            Self::Conflict(_) => IssueType::Conflict,
            Self::Processing(_) => IssueType::Processing,
            Self::Exception(_) => IssueType::Exception,
        }
    }

    /// Render this error as an OperationOutcome resource.
    pub fn to_outcome(&self) -> OperationOutcome {
        OperationOutcome::error(self.issue_type(), self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(PlatformError::Required("x".into()).status(), 400);
        assert_eq!(PlatformError::NotFound("x".into()).status(), 404);
        assert_eq!(PlatformError::NotAcceptable("xml".into()).status(), 406);
        assert_eq!(PlatformError::UnsupportedMedia("xml".into()).status(), 415);
        assert_eq!(PlatformError::Conflict("version".into()).status(), 409);
        assert_eq!(PlatformError::Exception("boom".into()).status(), 500);
    }

    #[test]
    fn test_outcome_rendering() {
        let outcome = PlatformError::NotFound("Patient/123".into()).to_outcome();
        assert_eq!(outcome.issue.len(), 1);
        assert_eq!(outcome.issue[0].code, IssueType::NotFound);
        assert!(outcome.issue[0]
            .diagnostics
            .as_ref()
            .unwrap()
            .contains("Patient/123"));
    }

    #[test]
    fn test_json_error_is_structure() {
        let err: PlatformError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert_eq!(err.status(), 400);
        assert_eq!(err.issue_type(), IssueType::Structure);
    }
}
