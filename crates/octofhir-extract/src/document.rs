//! Raw documents and the validation gate.
//!
//! Every row of the generic resource table enters the pipeline as a
//! [`RawDocument`]. [`validate`] parses it once and tags it; the parsed JSON
//! tree travels with the tag so later stages never parse again.

use std::fmt;

use octofhir_core::RESOURCE_TYPE_KEY;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of the document store: a stable identifier plus the `content` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Stable identifier assigned by the store.
    pub id: String,

    /// Payload text, expected (but not guaranteed) to be JSON.
    pub payload: String,
}

impl RawDocument {
    /// Create a new raw document.
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }
}

/// A structurally valid document that carries a resource-type marker.
#[derive(Debug, Clone, PartialEq)]
pub struct FhirCandidate {
    /// Identifier of the document this candidate was parsed from.
    pub source_id: String,

    /// Value of the top-level `resourceType` key.
    pub resource_type: String,

    /// Parsed JSON object.
    pub value: Value,
}

/// Outcome of the validation gate for a single document.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// The payload is not well-formed JSON. Holds the parser message.
    Invalid { message: String },

    /// Well-formed JSON without a usable resource-type marker.
    ValidNonFhir(Value),

    /// Well-formed JSON object with a non-empty `resourceType` string.
    FhirCandidate(FhirCandidate),
}

/// Tag-only view of a [`ValidationResult`], convenient for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Invalid,
    ValidNonFhir,
    FhirCandidate,
}

impl ValidationResult {
    pub fn kind(&self) -> ValidationKind {
        match self {
            Self::Invalid { .. } => ValidationKind::Invalid,
            Self::ValidNonFhir(_) => ValidationKind::ValidNonFhir,
            Self::FhirCandidate(_) => ValidationKind::FhirCandidate,
        }
    }

    pub fn is_valid_json(&self) -> bool {
        !matches!(self, Self::Invalid { .. })
    }

    pub fn into_candidate(self) -> Option<FhirCandidate> {
        match self {
            Self::FhirCandidate(candidate) => Some(candidate),
            _ => None,
        }
    }
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid"),
            Self::ValidNonFhir => write!(f, "valid_non_fhir"),
            Self::FhirCandidate => write!(f, "fhir_candidate"),
        }
    }
}

/// Read the resource-type marker of a JSON value, if it has a usable one.
pub(crate) fn resource_type_of(value: &Value) -> Option<&str> {
    value
        .as_object()?
        .get(RESOURCE_TYPE_KEY)?
        .as_str()
        .filter(|s| !s.trim().is_empty())
}

/// Parse and tag a raw document. Never fails: malformed input is data.
pub fn validate(doc: &RawDocument) -> ValidationResult {
    let value: Value = match serde_json::from_str(&doc.payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(source_id = %doc.id, error = %e, "Document is not valid JSON");
            return ValidationResult::Invalid {
                message: e.to_string(),
            };
        }
    };

    match resource_type_of(&value) {
        Some(resource_type) => ValidationResult::FhirCandidate(FhirCandidate {
            source_id: doc.id.clone(),
            resource_type: resource_type.to_string(),
            value,
        }),
        None => ValidationResult::ValidNonFhir(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_malformed_payloads_are_invalid() {
        for payload in ["not json", "", "{", "{\"resourceType\": }", "[1, 2"] {
            let doc = RawDocument::new("d", payload);
            let result = validate(&doc);
            assert_eq!(result.kind(), ValidationKind::Invalid, "payload: {payload:?}");
            assert!(!result.is_valid_json());
        }
    }

    #[test]
    fn test_json_without_marker_is_non_fhir() {
        for payload in [
            "{}",
            "[]",
            "42",
            "\"Patient\"",
            r#"{"resourceType": null}"#,
            r#"{"resourceType": 7}"#,
            r#"{"resourceType": ""}"#,
            r#"{"id": "x"}"#,
        ] {
            let result = validate(&RawDocument::new("d", payload));
            assert_eq!(result.kind(), ValidationKind::ValidNonFhir, "payload: {payload}");
            assert!(result.is_valid_json());
        }
    }

    #[test]
    fn test_candidate_carries_type_and_value() {
        let doc = RawDocument::new("row-7", r#"{"resourceType":"Patient","id":"p2"}"#);
        let candidate = validate(&doc).into_candidate().unwrap();
        assert_eq!(candidate.source_id, "row-7");
        assert_eq!(candidate.resource_type, "Patient");
        assert_eq!(candidate.value, json!({"resourceType": "Patient", "id": "p2"}));
    }

    #[test]
    fn test_validation_kind_display() {
        assert_eq!(ValidationKind::Invalid.to_string(), "invalid");
        assert_eq!(ValidationKind::FhirCandidate.to_string(), "fhir_candidate");
    }
}
