//! ConceptMap registry and the `$translate` engine.
//!
//! Maps are indexed three ways: by (source, target) system pair, by
//! canonical URL, and by id. A missing mapping is a negative result, not an
//! error; an unknown map is an error.

use crate::error::{PlatformError, Result};
use serde_json::{Value, json};
use std::collections::HashMap;

/// One translation target for a source code.
#[derive(Debug, Clone)]
pub struct ConceptMapping {
    pub target_code: String,
    pub target_display: String,
    pub equivalence: String,
}

/// A code translation table between two terminologies.
#[derive(Debug, Clone)]
pub struct ConceptMap {
    pub id: String,
    pub url: String,
    pub source_uri: String,
    pub target_uri: String,
    pub mappings: HashMap<String, Vec<ConceptMapping>>,
}

impl ConceptMap {
    /// Emit this map as a FHIR ConceptMap resource.
    pub fn to_resource(&self) -> Value {
        let mut codes: Vec<&String> = self.mappings.keys().collect();
        codes.sort();
        let elements: Vec<Value> = codes
            .into_iter()
            .map(|code| {
                let targets: Vec<Value> = self.mappings[code]
                    .iter()
                    .map(|m| {
                        json!({
                            "code": m.target_code,
                            "display": m.target_display,
                            "equivalence": m.equivalence,
                        })
                    })
                    .collect();
                json!({"code": code, "target": targets})
            })
            .collect();

        json!({
            "resourceType": "ConceptMap",
            "id": self.id,
            "url": self.url,
            "status": "active",
            "sourceUri": self.source_uri,
            "targetUri": self.target_uri,
            "group": [{
                "source": self.source_uri,
                "target": self.target_uri,
                "element": elements,
            }],
        })
    }
}

/// A `$translate` invocation.
#[derive(Debug, Clone, Default)]
pub struct TranslateRequest {
    /// Canonical URL of the map to use
    pub url: Option<String>,
    /// Id of the map to use (instance-level invocation)
    pub concept_map_id: Option<String>,
    pub code: String,
    pub system: Option<String>,
    pub target_system: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TranslateMatch {
    pub equivalence: String,
    pub code: String,
    pub display: String,
    pub system: String,
}

#[derive(Debug, Clone)]
pub struct TranslateResult {
    pub result: bool,
    pub message: String,
    pub matches: Vec<TranslateMatch>,
}

impl TranslateResult {
    /// Emit this result as a FHIR Parameters resource.
    pub fn to_parameters(&self) -> Value {
        let mut parameters = vec![
            json!({"name": "result", "valueBoolean": self.result}),
            json!({"name": "message", "valueString": self.message}),
        ];
        for m in &self.matches {
            parameters.push(json!({
                "name": "match",
                "part": [
                    {"name": "equivalence", "valueCode": m.equivalence},
                    {
                        "name": "concept",
                        "valueCoding": {
                            "system": m.system,
                            "code": m.code,
                            "display": m.display,
                        },
                    },
                ],
            }));
        }
        json!({"resourceType": "Parameters", "parameter": parameters})
    }
}

/// Registry of concept maps with pair/url/id indexes.
#[derive(Debug, Default)]
pub struct TranslateRegistry {
    maps: Vec<ConceptMap>,
    by_pair: HashMap<(String, String), usize>,
    by_url: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
}

impl TranslateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in terminology maps.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for map in builtin_maps() {
            registry.register(map);
        }
        registry
    }

    pub fn register(&mut self, map: ConceptMap) {
        let index = self.maps.len();
        self.by_pair
            .insert((map.source_uri.clone(), map.target_uri.clone()), index);
        self.by_url.insert(map.url.clone(), index);
        self.by_id.insert(map.id.clone(), index);
        self.maps.push(map);
    }

    pub fn get_by_id(&self, id: &str) -> Option<&ConceptMap> {
        self.by_id.get(id).map(|&i| &self.maps[i])
    }

    pub fn list(&self) -> &[ConceptMap] {
        &self.maps
    }

    /// Select the map a request names, by id, URL, or system pair.
    fn select(&self, request: &TranslateRequest) -> Result<&ConceptMap> {
        if let Some(ref id) = request.concept_map_id {
            return self
                .get_by_id(id)
                .ok_or_else(|| PlatformError::NotFound(format!("ConceptMap/{}", id)));
        }
        if let Some(ref url) = request.url {
            return self
                .by_url
                .get(url)
                .map(|&i| &self.maps[i])
                .ok_or_else(|| PlatformError::NotFound(format!("ConceptMap with url {}", url)));
        }
        match (&request.system, &request.target_system) {
            (Some(system), Some(target)) => self
                .by_pair
                .get(&(system.clone(), target.clone()))
                .map(|&i| &self.maps[i])
                .ok_or_else(|| {
                    PlatformError::NotFound(format!(
                        "no ConceptMap registered from {} to {}",
                        system, target
                    ))
                }),
            _ => Err(PlatformError::Required(
                "either url, a concept map id, or system and targetsystem must be supplied"
                    .to_string(),
            )),
        }
    }

    /// Translate one code. A known map without a mapping for the code yields
    /// `result = false`, not an error.
    pub fn translate(&self, request: &TranslateRequest) -> Result<TranslateResult> {
        if request.code.is_empty() {
            return Err(PlatformError::Required("code parameter is required".to_string()));
        }
        let map = self.select(request)?;

        match map.mappings.get(&request.code) {
            Some(mappings) if !mappings.is_empty() => Ok(TranslateResult {
                result: true,
                message: format!(
                    "{} mapping(s) found for {} in {}",
                    mappings.len(),
                    request.code,
                    map.url
                ),
                matches: mappings
                    .iter()
                    .map(|m| TranslateMatch {
                        equivalence: m.equivalence.clone(),
                        code: m.target_code.clone(),
                        display: m.target_display.clone(),
                        system: map.target_uri.clone(),
                    })
                    .collect(),
            }),
            _ => Ok(TranslateResult {
                result: false,
                message: format!("no mapping found for code {} in {}", request.code, map.url),
                matches: Vec::new(),
            }),
        }
    }
}

const SNOMED: &str = "http://snomed.info/sct";
const ICD10CM: &str = "http://hl7.org/fhir/sid/icd-10-cm";
const LOINC: &str = "http://loinc.org";

fn builtin_maps() -> Vec<ConceptMap> {
    let equivalent = |code: &str, display: &str| {
        vec![ConceptMapping {
            target_code: code.to_string(),
            target_display: display.to_string(),
            equivalence: "equivalent".to_string(),
        }]
    };

    let mut snomed_to_icd10 = HashMap::new();
    snomed_to_icd10.insert(
        "73211009".to_string(),
        equivalent("E11.9", "Type 2 diabetes mellitus without complications"),
    );
    snomed_to_icd10.insert(
        "38341003".to_string(),
        equivalent("I10", "Essential (primary) hypertension"),
    );
    snomed_to_icd10.insert(
        "195967001".to_string(),
        equivalent("J45.909", "Unspecified asthma, uncomplicated"),
    );
    snomed_to_icd10.insert(
        "44054006".to_string(),
        equivalent("E11.9", "Type 2 diabetes mellitus without complications"),
    );

    let mut loinc_to_snomed = HashMap::new();
    loinc_to_snomed.insert(
        "85354-9".to_string(),
        vec![ConceptMapping {
            target_code: "75367002".to_string(),
            target_display: "Blood pressure (observable entity)".to_string(),
            equivalence: "wider".to_string(),
        }],
    );
    loinc_to_snomed.insert(
        "29463-7".to_string(),
        equivalent("27113001", "Body weight (observable entity)"),
    );

    vec![
        ConceptMap {
            id: "snomed-to-icd10cm".to_string(),
            url: "http://hearth.dev/ConceptMap/snomed-to-icd10cm".to_string(),
            source_uri: SNOMED.to_string(),
            target_uri: ICD10CM.to_string(),
            mappings: snomed_to_icd10,
        },
        ConceptMap {
            id: "loinc-to-snomed".to_string(),
            url: "http://hearth.dev/ConceptMap/loinc-to-snomed".to_string(),
            source_uri: LOINC.to_string(),
            target_uri: SNOMED.to_string(),
            mappings: loinc_to_snomed,
        },
    ]
}
