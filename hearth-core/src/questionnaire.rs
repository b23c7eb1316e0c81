//! Questionnaire parsing: item tree, enable-when rules, initial values.

use crate::error::{PlatformError, Result};
use serde_json::Value;

/// Questionnaire item types (FHIR R4 item-type value set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Group,
    Display,
    Boolean,
    Decimal,
    Integer,
    Date,
    DateTime,
    Time,
    String,
    Text,
    Url,
    Choice,
    OpenChoice,
    Attachment,
    Reference,
    Quantity,
}

impl ItemType {
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "group" => Self::Group,
            "display" => Self::Display,
            "boolean" => Self::Boolean,
            "decimal" => Self::Decimal,
            "integer" => Self::Integer,
            "date" => Self::Date,
            "dateTime" => Self::DateTime,
            "time" => Self::Time,
            "string" => Self::String,
            "text" => Self::Text,
            "url" => Self::Url,
            "choice" => Self::Choice,
            "open-choice" => Self::OpenChoice,
            "attachment" => Self::Attachment,
            "reference" => Self::Reference,
            "quantity" => Self::Quantity,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Display => "display",
            Self::Boolean => "boolean",
            Self::Decimal => "decimal",
            Self::Integer => "integer",
            Self::Date => "date",
            Self::DateTime => "dateTime",
            Self::Time => "time",
            Self::String => "string",
            Self::Text => "text",
            Self::Url => "url",
            Self::Choice => "choice",
            Self::OpenChoice => "open-choice",
            Self::Attachment => "attachment",
            Self::Reference => "reference",
            Self::Quantity => "quantity",
        }
    }
}

/// Comparison operators usable in `enableWhen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOperator {
    Exists,
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
}

impl EnableOperator {
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "exists" => Self::Exists,
            "=" => Self::Equal,
            "!=" => Self::NotEqual,
            ">" => Self::Greater,
            "<" => Self::Less,
            ">=" => Self::GreaterOrEqual,
            "<=" => Self::LessOrEqual,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnableBehavior {
    #[default]
    All,
    Any,
}

/// One enable-when condition on an item.
#[derive(Debug, Clone)]
pub struct EnableWhen {
    /// linkId of the question the condition reads
    pub question: String,
    pub operator: EnableOperator,
    /// Expected answer, taken from the `answer[x]` choice element
    pub answer: Value,
}

/// A parsed questionnaire item; groups own their children by value.
#[derive(Debug, Clone)]
pub struct QuestionnaireItem {
    pub link_id: String,
    pub text: Option<String>,
    pub item_type: ItemType,
    pub required: bool,
    pub repeats: bool,
    pub read_only: bool,
    pub max_length: Option<u32>,
    /// Element definition URI, e.g. `...#Patient.name.family`
    pub definition: Option<String>,
    /// Codings attached to the item (terminology matching)
    pub code: Vec<Value>,
    pub answer_option: Vec<Value>,
    /// Initial values, unwrapped from their `value[x]` choice keys
    pub initial: Vec<Value>,
    pub enable_when: Vec<EnableWhen>,
    pub enable_behavior: EnableBehavior,
    pub items: Vec<QuestionnaireItem>,
}

/// A parsed questionnaire; immutable after parse.
#[derive(Debug, Clone)]
pub struct ParsedQuestionnaire {
    pub id: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub status: String,
    pub subject_type: Vec<String>,
    pub items: Vec<QuestionnaireItem>,
}

impl ParsedQuestionnaire {
    /// Canonical reference used by a QuestionnaireResponse.
    pub fn canonical(&self) -> String {
        if let Some(ref url) = self.url {
            return url.clone();
        }
        match self.id {
            Some(ref id) => format!("Questionnaire/{}", id),
            None => "Questionnaire".to_string(),
        }
    }
}

/// Parse a Questionnaire resource into its typed item tree.
pub fn parse_questionnaire(resource: &Value) -> Result<ParsedQuestionnaire> {
    if resource.get("resourceType").and_then(|v| v.as_str()) != Some("Questionnaire") {
        return Err(PlatformError::Structure(
            "resourceType must be 'Questionnaire'".to_string(),
        ));
    }
    let status = resource
        .get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PlatformError::Required("Questionnaire.status".to_string()))?;

    let items = resource
        .get("item")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().map(parse_item).collect::<Result<Vec<_>>>())
        .transpose()?
        .unwrap_or_default();

    Ok(ParsedQuestionnaire {
        id: str_field(resource, "id"),
        url: str_field(resource, "url"),
        title: str_field(resource, "title"),
        status: status.to_string(),
        subject_type: resource
            .get("subjectType")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default(),
        items,
    })
}

fn parse_item(item: &Value) -> Result<QuestionnaireItem> {
    let link_id = item
        .get("linkId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PlatformError::Required("Questionnaire.item.linkId".to_string()))?;

    let type_code = item
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            PlatformError::Required(format!("Questionnaire.item({}).type", link_id))
        })?;
    let item_type = ItemType::from_code(type_code).ok_or_else(|| {
        PlatformError::Value(format!(
            "unknown item type '{}' on item {}",
            type_code, link_id
        ))
    })?;

    let enable_when = item
        .get("enableWhen")
        .and_then(|v| v.as_array())
        .map(|conditions| {
            conditions
                .iter()
                .map(parse_enable_when)
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    let enable_behavior = match item.get("enableBehavior").and_then(|v| v.as_str()) {
        Some("any") => EnableBehavior::Any,
        _ => EnableBehavior::All,
    };

    let items = item
        .get("item")
        .and_then(|v| v.as_array())
        .map(|children| children.iter().map(parse_item).collect::<Result<Vec<_>>>())
        .transpose()?
        .unwrap_or_default();

    Ok(QuestionnaireItem {
        link_id: link_id.to_string(),
        text: str_field(item, "text"),
        item_type,
        required: bool_field(item, "required"),
        repeats: bool_field(item, "repeats"),
        read_only: bool_field(item, "readOnly"),
        max_length: item.get("maxLength").and_then(|v| v.as_u64()).map(|n| n as u32),
        definition: str_field(item, "definition"),
        code: item
            .get("code")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default(),
        answer_option: item
            .get("answerOption")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default(),
        initial: item
            .get("initial")
            .and_then(|v| v.as_array())
            .map(|values| values.iter().filter_map(choice_value).collect())
            .unwrap_or_default(),
        enable_when,
        enable_behavior,
        items,
    })
}

fn parse_enable_when(condition: &Value) -> Result<EnableWhen> {
    let question = condition
        .get("question")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PlatformError::Required("enableWhen.question".to_string()))?;
    let operator_code = condition
        .get("operator")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PlatformError::Required("enableWhen.operator".to_string()))?;
    let operator = EnableOperator::from_code(operator_code).ok_or_else(|| {
        PlatformError::Value(format!("unknown enableWhen operator '{}'", operator_code))
    })?;

    Ok(EnableWhen {
        question: question.to_string(),
        operator,
        answer: answer_value(condition).unwrap_or(Value::Null),
    })
}

/// Unwrap the `value[x]` choice element of an initial or answerOption entry.
pub fn choice_value(entry: &Value) -> Option<Value> {
    entry.as_object().and_then(|map| {
        map.iter()
            .find(|(key, _)| key.starts_with("value"))
            .map(|(_, v)| v.clone())
    })
}

/// Unwrap the `answer[x]` choice element of an enableWhen condition.
fn answer_value(condition: &Value) -> Option<Value> {
    condition.as_object().and_then(|map| {
        map.iter()
            .find(|(key, _)| key.starts_with("answer"))
            .map(|(_, v)| v.clone())
    })
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn bool_field(value: &Value, field: &str) -> bool {
    value.get(field).and_then(|v| v.as_bool()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_nested_items() {
        let questionnaire = json!({
            "resourceType": "Questionnaire",
            "id": "intake",
            "url": "http://example.org/Questionnaire/intake",
            "title": "Intake form",
            "status": "active",
            "subjectType": ["Patient"],
            "item": [
                {
                    "linkId": "demographics",
                    "type": "group",
                    "item": [
                        {"linkId": "name", "type": "string", "required": true},
                        {"linkId": "note", "type": "display", "text": "For staff use"}
                    ]
                }
            ]
        });

        let parsed = parse_questionnaire(&questionnaire).unwrap();
        assert_eq!(parsed.id.as_deref(), Some("intake"));
        assert_eq!(parsed.subject_type, vec!["Patient"]);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].item_type, ItemType::Group);
        assert_eq!(parsed.items[0].items.len(), 2);
        assert!(parsed.items[0].items[0].required);
        assert_eq!(parsed.items[0].items[1].item_type, ItemType::Display);
    }

    #[test]
    fn test_canonical_prefers_url() {
        let with_url = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "id": "q1",
            "url": "http://example.org/Questionnaire/q1",
            "status": "active"
        }))
        .unwrap();
        assert_eq!(with_url.canonical(), "http://example.org/Questionnaire/q1");

        let without_url = parse_questionnaire(&json!({
            "resourceType": "Questionnaire",
            "id": "q1",
            "status": "active"
        }))
        .unwrap();
        assert_eq!(without_url.canonical(), "Questionnaire/q1");
    }

    #[test]
    fn test_parse_enable_when() {
        let questionnaire = json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [
                {"linkId": "smoker", "type": "boolean"},
                {
                    "linkId": "packs",
                    "type": "integer",
                    "enableBehavior": "any",
                    "enableWhen": [
                        {"question": "smoker", "operator": "=", "answerBoolean": true},
                        {"question": "smoker", "operator": "exists", "answerBoolean": true}
                    ]
                }
            ]
        });

        let parsed = parse_questionnaire(&questionnaire).unwrap();
        let packs = &parsed.items[1];
        assert_eq!(packs.enable_behavior, EnableBehavior::Any);
        assert_eq!(packs.enable_when.len(), 2);
        assert_eq!(packs.enable_when[0].operator, EnableOperator::Equal);
        assert_eq!(packs.enable_when[0].answer, json!(true));
        assert_eq!(packs.enable_when[1].operator, EnableOperator::Exists);
    }

    #[test]
    fn test_parse_initial_values_unwrapped() {
        let questionnaire = json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [{
                "linkId": "country",
                "type": "string",
                "initial": [{"valueString": "JP"}]
            }]
        });
        let parsed = parse_questionnaire(&questionnaire).unwrap();
        assert_eq!(parsed.items[0].initial, vec![json!("JP")]);
    }

    #[test]
    fn test_unknown_item_type_rejected() {
        let questionnaire = json!({
            "resourceType": "Questionnaire",
            "status": "active",
            "item": [{"linkId": "x", "type": "hologram"}]
        });
        assert!(parse_questionnaire(&questionnaire).is_err());
    }

    #[test]
    fn test_wrong_resource_type_rejected() {
        assert!(parse_questionnaire(&json!({"resourceType": "Patient"})).is_err());
    }
}
