//! `Questionnaire/$populate`: QuestionnaireResponse synthesis.

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use hearth_core::populate::{self, PopulateContext};
use hearth_core::{PlatformError, parse_questionnaire};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::handlers::{parameters_resource, parameters_value};
use crate::respond::error_response;

#[derive(Debug)]
struct PopulateInput {
    subject: String,
    context: PopulateContext,
    questionnaire: Option<Value>,
}

/// Accept both the simple JSON body `{subject, context, questionnaire, ...}`
/// and a FHIR Parameters resource with named parameters.
fn parse_input(body: &Value) -> Result<PopulateInput, PlatformError> {
    if body.get("resourceType").and_then(|v| v.as_str()) == Some("Parameters") {
        let subject = parameters_value(body, "subject")
            .and_then(|v| match v {
                Value::String(s) => Some(s),
                Value::Object(ref map) => map
                    .get("reference")
                    .and_then(|r| r.as_str())
                    .map(|s| s.to_string()),
                _ => None,
            })
            .ok_or_else(|| PlatformError::Required("subject parameter".to_string()))?;

        let mut context = PopulateContext::default();
        if let Some(parameters) = body.get("parameter").and_then(|v| v.as_array()) {
            let resources: Vec<Value> = parameters
                .iter()
                .filter(|p| p.get("name").and_then(|n| n.as_str()) == Some("context"))
                .filter_map(|p| p.get("resource").cloned())
                .collect();
            if !resources.is_empty() {
                context = PopulateContext::from_value(&Value::Array(resources));
            }
        }

        return Ok(PopulateInput {
            subject,
            context,
            questionnaire: parameters_resource(body, "questionnaire"),
        });
    }

    let subject = body
        .get("subject")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| PlatformError::Required("subject".to_string()))?;

    let mut context = body
        .get("context")
        .map(PopulateContext::from_value)
        .unwrap_or_default();
    // launchContext resources fold into the same extraction context
    if context.patient.is_none()
        && let Some(launch) = body.get("launchContext")
    {
        let launched = PopulateContext::from_value(launch);
        if launched.patient.is_some() {
            context.patient = launched.patient;
        }
    }

    Ok(PopulateInput {
        subject,
        context,
        questionnaire: body.get("questionnaire").filter(|q| q.is_object()).cloned(),
    })
}

/// POST /Questionnaire/{id}/$populate
pub async fn populate_questionnaire(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let input = match parse_input(&body) {
        Ok(input) => input,
        Err(e) => return error_response(&e),
    };

    // an inline questionnaire wins; otherwise resolve by id
    let questionnaire_value = match input.questionnaire {
        Some(q) => q,
        None => {
            let reference = format!("Questionnaire/{}", id);
            match state.resolver.resolve(&reference).await {
                Ok(Some(q)) => q,
                Ok(None) => return error_response(&PlatformError::NotFound(reference)),
                Err(e) => {
                    return error_response(&PlatformError::Exception(e.to_string()));
                }
            }
        }
    };

    let questionnaire = match parse_questionnaire(&questionnaire_value) {
        Ok(q) => q,
        Err(e) => return error_response(&e),
    };

    let result = populate::populate(&questionnaire, &input.subject, &input.context);
    tracing::info!(
        questionnaire = %questionnaire.canonical(),
        populated = result.populated_count,
        total = result.total_items,
        "questionnaire populated"
    );

    Json(json!({
        "questionnaireResponse": result.questionnaire_response,
        "totalItems": result.total_items,
        "populatedCount": result.populated_count,
        "warnings": result.warnings,
    }))
    .into_response()
}
