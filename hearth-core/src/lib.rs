pub mod capability;
pub mod concept_map;
pub mod cursor;
pub mod document;
pub mod error;
pub mod operation_outcome;
pub mod populate;
pub mod profile;
pub mod questionnaire;
pub mod resource;
pub mod search_bundle;
pub mod search_param;
pub mod validation;

pub use capability::{CapabilityBuilder, ResourceOptions, ServerOperation};
pub use concept_map::{ConceptMap, TranslateRegistry, TranslateRequest, TranslateResult};
pub use cursor::{CursorToken, decode_cursor, encode_cursor};
pub use error::{PlatformError, Result};
pub use operation_outcome::{
    CodeableConcept, Coding, IssueSeverity, IssueType, OperationOutcome, OperationOutcomeIssue,
};
pub use profile::{ProfileConstraint, ProfileDefinition, ProfileRegistry};
pub use questionnaire::{ParsedQuestionnaire, QuestionnaireItem, parse_questionnaire};
pub use resource::{Meta, Resource};
pub use search_bundle::{RevIncludeProvider, SearchPage};
pub use search_param::{CustomSearchParam, CustomSearchParamRegistry, SearchParamType};
