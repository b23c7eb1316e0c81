//! `Questionnaire/$populate`: derive a QuestionnaireResponse from a
//! questionnaire, a subject reference, and a patient-centred context.

use crate::questionnaire::{
    EnableBehavior, EnableOperator, EnableWhen, ItemType, ParsedQuestionnaire, QuestionnaireItem,
};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

/// Per-patient resources the engine extracts answers from.
#[derive(Debug, Clone, Default)]
pub struct PopulateContext {
    pub patient: Option<Value>,
    pub observations: Vec<Value>,
    pub conditions: Vec<Value>,
    pub medication_requests: Vec<Value>,
}

impl PopulateContext {
    /// Build a context from the request's `context` value: either a keyed
    /// object (`{patient, observations, ...}`) or a flat resource array
    /// classified by resourceType.
    pub fn from_value(context: &Value) -> Self {
        let mut built = Self::default();
        match context {
            Value::Object(map) => {
                built.patient = map.get("patient").cloned();
                for (key, bucket) in [
                    ("observations", &mut built.observations),
                    ("conditions", &mut built.conditions),
                    ("medicationRequests", &mut built.medication_requests),
                ] {
                    if let Some(arr) = map.get(key).and_then(|v| v.as_array()) {
                        *bucket = arr.clone();
                    }
                }
            }
            Value::Array(resources) => {
                for resource in resources {
                    built.absorb(resource.clone());
                }
            }
            _ => {}
        }
        built
    }

    fn absorb(&mut self, resource: Value) {
        match resource.get("resourceType").and_then(|v| v.as_str()) {
            Some("Patient") if self.patient.is_none() => self.patient = Some(resource),
            Some("Observation") => self.observations.push(resource),
            Some("Condition") => self.conditions.push(resource),
            Some("MedicationRequest") => self.medication_requests.push(resource),
            _ => {}
        }
    }
}

/// Outcome of a populate run.
#[derive(Debug, Clone)]
pub struct PopulateResult {
    pub questionnaire_response: Value,
    pub total_items: usize,
    pub populated_count: usize,
    pub warnings: Vec<String>,
}

/// Derive a QuestionnaireResponse for `subject` from the context.
pub fn populate(
    questionnaire: &ParsedQuestionnaire,
    subject: &str,
    context: &PopulateContext,
) -> PopulateResult {
    let mut state = PopulateState {
        context,
        answers: HashMap::new(),
        total_items: 0,
        populated_count: 0,
        warnings: Vec::new(),
    };

    let items = state.populate_items(&questionnaire.items);

    let response = json!({
        "resourceType": "QuestionnaireResponse",
        "id": uuid::Uuid::new_v4().to_string(),
        "questionnaire": questionnaire.canonical(),
        "status": "in-progress",
        "authored": chrono::Utc::now().to_rfc3339(),
        "subject": {"reference": subject},
        "item": items,
    });

    PopulateResult {
        questionnaire_response: response,
        total_items: state.total_items,
        populated_count: state.populated_count,
        warnings: state.warnings,
    }
}

struct PopulateState<'a> {
    context: &'a PopulateContext,
    /// Answers keyed by linkId, read by enable-when evaluation
    answers: HashMap<String, Value>,
    total_items: usize,
    populated_count: usize,
    warnings: Vec<String>,
}

impl PopulateState<'_> {
    fn populate_items(&mut self, items: &[QuestionnaireItem]) -> Vec<Value> {
        let mut out = Vec::new();
        for item in items {
            if !self.is_enabled(item) {
                continue;
            }
            match item.item_type {
                ItemType::Display => {
                    self.total_items += 1;
                }
                ItemType::Group => {
                    self.total_items += 1;
                    let children = self.populate_items(&item.items);
                    // groups are emitted only when a descendant populated
                    if !children.is_empty() {
                        let mut entry = qr_item_shell(item);
                        entry.insert("item".to_string(), json!(children));
                        out.push(Value::Object(entry));
                    }
                }
                _ => {
                    self.total_items += 1;
                    let value = self
                        .extract(item)
                        .or_else(|| item.initial.first().cloned());
                    let Some(value) = value else {
                        if item.required {
                            self.warnings.push(format!(
                                "required item '{}' could not be populated from context",
                                item.link_id
                            ));
                        }
                        continue;
                    };

                    self.answers.insert(item.link_id.clone(), value.clone());
                    self.populated_count += 1;

                    let mut entry = qr_item_shell(item);
                    entry.insert(
                        "answer".to_string(),
                        json!([answer_object(item.item_type, value)]),
                    );
                    out.push(Value::Object(entry));
                }
            }
        }
        out
    }

    fn is_enabled(&self, item: &QuestionnaireItem) -> bool {
        if item.enable_when.is_empty() {
            return true;
        }
        let mut results = item
            .enable_when
            .iter()
            .map(|condition| self.evaluate_condition(condition));
        match item.enable_behavior {
            EnableBehavior::All => results.all(|r| r),
            EnableBehavior::Any => results.any(|r| r),
        }
    }

    fn evaluate_condition(&self, condition: &EnableWhen) -> bool {
        let answer = self.answers.get(&condition.question);
        match condition.operator {
            EnableOperator::Exists => {
                let expected = condition.answer.as_bool().unwrap_or(true);
                answer.is_some() == expected
            }
            EnableOperator::Equal => answer.is_some_and(|a| values_equal(a, &condition.answer)),
            EnableOperator::NotEqual => match answer {
                // an unanswered question is, by definition, not equal
                None => true,
                Some(a) => !values_equal(a, &condition.answer),
            },
            EnableOperator::Greater => self.compare(answer, condition, |a, b| a > b),
            EnableOperator::Less => self.compare(answer, condition, |a, b| a < b),
            EnableOperator::GreaterOrEqual => self.compare(answer, condition, |a, b| a >= b),
            EnableOperator::LessOrEqual => self.compare(answer, condition, |a, b| a <= b),
        }
    }

    fn compare(
        &self,
        answer: Option<&Value>,
        condition: &EnableWhen,
        op: fn(f64, f64) -> bool,
    ) -> bool {
        match answer {
            Some(a) => op(lenient_number(a), lenient_number(&condition.answer)),
            None => false,
        }
    }

    /// Context extraction in priority order: element definition against the
    /// patient, then Observation, Condition, and MedicationRequest codings.
    fn extract(&mut self, item: &QuestionnaireItem) -> Option<Value> {
        if let Some(ref definition) = item.definition
            && let Some(patient) = &self.context.patient
            && let Some(value) = extract_from_definition(patient, definition)
        {
            return Some(value);
        }

        if item.code.is_empty() {
            return None;
        }

        for observation in &self.context.observations {
            if codings_intersect(&item.code, observation.get("code"))
                && let Some(value) = observation_value(observation)
            {
                return Some(value);
            }
        }

        for condition in &self.context.conditions {
            if codings_intersect(&item.code, condition.get("code"))
                && let Some(coding) = first_coding(condition.get("code"))
            {
                return Some(coding);
            }
        }

        for request in &self.context.medication_requests {
            let concept = request.get("medicationCodeableConcept");
            if codings_intersect(&item.code, concept)
                && let Some(coding) = first_coding(concept)
            {
                return Some(coding);
            }
        }

        None
    }
}

fn qr_item_shell(item: &QuestionnaireItem) -> Map<String, Value> {
    let mut entry = Map::new();
    entry.insert("linkId".to_string(), json!(item.link_id));
    if let Some(ref text) = item.text {
        entry.insert("text".to_string(), json!(text));
    }
    entry
}

/// Wrap an extracted value in the answer key matching the item type.
fn answer_object(item_type: ItemType, value: Value) -> Value {
    match item_type {
        ItemType::Boolean => keyed("valueBoolean", value),
        ItemType::Decimal => keyed("valueDecimal", value),
        ItemType::Integer => keyed("valueInteger", value),
        ItemType::Date => keyed("valueDate", value),
        ItemType::DateTime => keyed("valueDateTime", value),
        ItemType::Time => keyed("valueTime", value),
        ItemType::Url => keyed("valueUri", value),
        ItemType::Choice | ItemType::OpenChoice if value.is_object() => {
            keyed("valueCoding", value)
        }
        ItemType::Reference if value.is_object() => keyed("valueReference", value),
        ItemType::Quantity if value.is_object() => keyed("valueQuantity", value),
        ItemType::Attachment if value.is_object() => keyed("valueAttachment", value),
        // string, text, and everything without a structured form
        _ => keyed("valueString", Value::String(format_value(&value))),
    }
}

fn keyed(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    // tolerate number-vs-string answers from sloppy questionnaires
    match (a.as_str(), b.as_str()) {
        (Some(s), None) => b.as_f64().map(|n| n.to_string()) == Some(s.to_string()),
        (None, Some(s)) => a.as_f64().map(|n| n.to_string()) == Some(s.to_string()),
        _ => false,
    }
}

/// Lenient number cast; anything unparsable is 0.
fn lenient_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    }
}

/// Resolve a `...#Patient.<field>[.<sub>]` definition against the patient.
fn extract_from_definition(patient: &Value, definition: &str) -> Option<Value> {
    let fragment = definition.rsplit_once('#').map(|(_, f)| f)?;
    let path = fragment.strip_prefix("Patient.")?;
    let mut segments = path.splitn(2, '.');
    let field = segments.next()?;
    let sub = segments.next();

    match field {
        "name" => {
            let name = patient.get("name")?.as_array()?.first()?;
            match sub.unwrap_or("family") {
                "family" => name.get("family").cloned(),
                "given" => name
                    .get("given")
                    .and_then(|v| v.as_array())
                    .and_then(|a| a.first())
                    .cloned(),
                _ => None,
            }
        }
        "gender" => patient.get("gender").cloned(),
        "birthDate" => patient.get("birthDate").cloned(),
        "telecom" => {
            let telecom = patient.get("telecom")?.as_array()?.first()?;
            match sub.unwrap_or("value") {
                "value" => telecom.get("value").cloned(),
                "system" => telecom.get("system").cloned(),
                _ => None,
            }
        }
        "address" => {
            let address = patient.get("address")?.as_array()?.first()?;
            match sub.unwrap_or("city") {
                "line" => address
                    .get("line")
                    .and_then(|v| v.as_array())
                    .and_then(|a| a.first())
                    .cloned(),
                "city" => address.get("city").cloned(),
                "state" => address.get("state").cloned(),
                "postalCode" => address.get("postalCode").cloned(),
                "country" => address.get("country").cloned(),
                _ => None,
            }
        }
        _ => None,
    }
}

/// True when any item coding shares a code with the concept's codings.
fn codings_intersect(item_codes: &[Value], concept: Option<&Value>) -> bool {
    let Some(codings) = concept.and_then(|c| c.get("coding")).and_then(|v| v.as_array()) else {
        return false;
    };
    item_codes.iter().any(|item_code| {
        let code = item_code.get("code").and_then(|v| v.as_str());
        let system = item_code.get("system").and_then(|v| v.as_str());
        codings.iter().any(|coding| {
            let code_matches = code.is_some()
                && coding.get("code").and_then(|v| v.as_str()) == code;
            let system_matches = system.is_none()
                || coding.get("system").and_then(|v| v.as_str()) == system;
            code_matches && system_matches
        })
    })
}

fn first_coding(concept: Option<&Value>) -> Option<Value> {
    concept?
        .get("coding")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .cloned()
}

/// The observation's value, whichever `value[x]` choice it carries.
fn observation_value(observation: &Value) -> Option<Value> {
    for key in [
        "valueQuantity",
        "valueCodeableConcept",
        "valueString",
        "valueBoolean",
        "valueInteger",
        "valueDateTime",
    ] {
        if let Some(value) = observation.get(key) {
            return Some(value.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questionnaire::parse_questionnaire;

    fn smith() -> PopulateContext {
        PopulateContext {
            patient: Some(json!({
                "resourceType": "Patient",
                "name": [{"family": "Smith", "given": ["John"]}],
                "gender": "male",
                "telecom": [{"system": "phone", "value": "555-0100"}],
                "address": [{"line": ["1 Main St"], "city": "Springfield", "postalCode": "62704"}]
            })),
            ..PopulateContext::default()
        }
    }

    #[test]
    fn test_populate_from_patient_name() {
        let questionnaire = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "id": "demo",
            "status": "active",
            "item": [{
                "linkId": "name",
                "type": "string",
                "definition": "http://hl7.org/fhir/StructureDefinition/Patient#Patient.name.family"
            }]
        }))
        .unwrap();

        let result = populate(&questionnaire, "Patient/p1", &smith());
        let qr = &result.questionnaire_response;
        assert_eq!(qr["resourceType"], "QuestionnaireResponse");
        assert_eq!(qr["status"], "in-progress");
        assert_eq!(qr["subject"]["reference"], "Patient/p1");
        assert_eq!(qr["item"][0]["linkId"], "name");
        assert_eq!(qr["item"][0]["answer"][0]["valueString"], "Smith");
        assert_eq!(result.populated_count, 1);
        assert_eq!(result.total_items, 1);
    }

    #[test]
    fn test_display_items_never_answered() {
        let questionnaire = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [
                {"linkId": "info", "type": "display", "text": "Read this"},
                {
                    "linkId": "gender",
                    "type": "string",
                    "definition": "#Patient.gender"
                }
            ]
        }))
        .unwrap();

        let result = populate(&questionnaire, "Patient/p1", &smith());
        let items = result.questionnaire_response["item"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["linkId"], "gender");
    }

    #[test]
    fn test_group_emitted_only_when_descendant_populated() {
        let questionnaire = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [
                {
                    "linkId": "contact",
                    "type": "group",
                    "item": [{"linkId": "phone", "type": "string", "definition": "#Patient.telecom.value"}]
                },
                {
                    "linkId": "empty-group",
                    "type": "group",
                    "item": [{"linkId": "nothing", "type": "string"}]
                }
            ]
        }))
        .unwrap();

        let result = populate(&questionnaire, "Patient/p1", &smith());
        let items = result.questionnaire_response["item"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["linkId"], "contact");
        assert_eq!(items[0]["item"][0]["answer"][0]["valueString"], "555-0100");
    }

    #[test]
    fn test_initial_value_fallback() {
        let questionnaire = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [{
                "linkId": "country",
                "type": "string",
                "initial": [{"valueString": "US"}]
            }]
        }))
        .unwrap();

        let result = populate(&questionnaire, "Patient/p1", &PopulateContext::default());
        assert_eq!(
            result.questionnaire_response["item"][0]["answer"][0]["valueString"],
            "US"
        );
    }

    #[test]
    fn test_observation_code_match() {
        let context = PopulateContext {
            observations: vec![json!({
                "resourceType": "Observation",
                "status": "final",
                "code": {"coding": [{"system": "http://loinc.org", "code": "29463-7"}]},
                "valueQuantity": {"value": 82.5, "unit": "kg"}
            })],
            ..PopulateContext::default()
        };
        let questionnaire = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [{
                "linkId": "weight",
                "type": "quantity",
                "code": [{"system": "http://loinc.org", "code": "29463-7"}]
            }]
        }))
        .unwrap();

        let result = populate(&questionnaire, "Patient/p1", &context);
        let answer = &result.questionnaire_response["item"][0]["answer"][0];
        assert_eq!(answer["valueQuantity"]["value"], 82.5);
    }

    #[test]
    fn test_condition_code_match_yields_coding() {
        let context = PopulateContext {
            conditions: vec![json!({
                "resourceType": "Condition",
                "subject": {"reference": "Patient/p1"},
                "code": {"coding": [{"system": "http://snomed.info/sct", "code": "73211009", "display": "Diabetes mellitus type 2"}]}
            })],
            ..PopulateContext::default()
        };
        let questionnaire = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [{
                "linkId": "diagnosis",
                "type": "choice",
                "code": [{"system": "http://snomed.info/sct", "code": "73211009"}]
            }]
        }))
        .unwrap();

        let result = populate(&questionnaire, "Patient/p1", &context);
        let answer = &result.questionnaire_response["item"][0]["answer"][0];
        assert_eq!(answer["valueCoding"]["code"], "73211009");
    }

    #[test]
    fn test_enable_when_gates_dependent_item() {
        let questionnaire = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [
                {
                    "linkId": "gender",
                    "type": "string",
                    "definition": "#Patient.gender"
                },
                {
                    "linkId": "male-only",
                    "type": "string",
                    "initial": [{"valueString": "shown"}],
                    "enableWhen": [{"question": "gender", "operator": "=", "answerString": "male"}]
                },
                {
                    "linkId": "female-only",
                    "type": "string",
                    "initial": [{"valueString": "hidden"}],
                    "enableWhen": [{"question": "gender", "operator": "=", "answerString": "female"}]
                }
            ]
        }))
        .unwrap();

        let result = populate(&questionnaire, "Patient/p1", &smith());
        let ids: Vec<&str> = result.questionnaire_response["item"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["linkId"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["gender", "male-only"]);
    }

    #[test]
    fn test_enable_when_not_equal_with_missing_answer() {
        let questionnaire = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [
                {"linkId": "unanswered", "type": "string"},
                {
                    "linkId": "dependent",
                    "type": "string",
                    "initial": [{"valueString": "emitted"}],
                    "enableWhen": [{"question": "unanswered", "operator": "!=", "answerString": "x"}]
                }
            ]
        }))
        .unwrap();

        let result = populate(&questionnaire, "Patient/p1", &PopulateContext::default());
        assert_eq!(result.questionnaire_response["item"][0]["linkId"], "dependent");
    }

    #[test]
    fn test_enable_when_numeric_comparison() {
        let questionnaire = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [
                {"linkId": "age", "type": "integer", "initial": [{"valueInteger": 70}]},
                {
                    "linkId": "senior",
                    "type": "string",
                    "initial": [{"valueString": "yes"}],
                    "enableWhen": [{"question": "age", "operator": ">=", "answerInteger": 65}]
                },
                {
                    "linkId": "minor",
                    "type": "string",
                    "initial": [{"valueString": "yes"}],
                    "enableWhen": [{"question": "age", "operator": "<", "answerInteger": 18}]
                }
            ]
        }))
        .unwrap();

        let result = populate(&questionnaire, "Patient/p1", &PopulateContext::default());
        let ids: Vec<&str> = result.questionnaire_response["item"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["linkId"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["age", "senior"]);
    }

    #[test]
    fn test_enable_behavior_any() {
        let questionnaire = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [
                {"linkId": "a", "type": "string", "initial": [{"valueString": "1"}]},
                {
                    "linkId": "gated",
                    "type": "string",
                    "initial": [{"valueString": "open"}],
                    "enableBehavior": "any",
                    "enableWhen": [
                        {"question": "a", "operator": "=", "answerString": "1"},
                        {"question": "a", "operator": "=", "answerString": "2"}
                    ]
                }
            ]
        }))
        .unwrap();

        let result = populate(&questionnaire, "Patient/p1", &PopulateContext::default());
        assert_eq!(result.questionnaire_response["item"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_required_unpopulated_item_warns() {
        let questionnaire = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [{"linkId": "allergies", "type": "string", "required": true}]
        }))
        .unwrap();

        let result = populate(&questionnaire, "Patient/p1", &PopulateContext::default());
        assert_eq!(result.populated_count, 0);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("allergies"));
    }

    #[test]
    fn test_context_from_flat_array() {
        let context = PopulateContext::from_value(&json!([
            {"resourceType": "Patient", "gender": "female"},
            {"resourceType": "Observation", "status": "final", "code": {"coding": []}},
            {"resourceType": "Condition", "subject": {"reference": "Patient/1"}, "code": {"coding": []}}
        ]));
        assert!(context.patient.is_some());
        assert_eq!(context.observations.len(), 1);
        assert_eq!(context.conditions.len(), 1);
    }
}
