//! Singleton vs bundle classification of FHIR candidates.

use octofhir_core::ResourceType;
use serde_json::Value;

use crate::bundle::{BundleEntries, ResourceInstance};
use crate::document::FhirCandidate;

/// Key holding the entry collection of a bundle.
pub(crate) const ENTRY_KEY: &str = "entry";

/// Shapes that match neither a clean singleton nor a clean bundle.
///
/// These never fail classification: the resource is handled as a singleton
/// and the warning is surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassificationWarning {
    /// `entry` is present but is an object or scalar, not an array.
    #[error("'entry' is a {found}, not an array; treated as a single resource")]
    EntryNotArray { found: &'static str },

    /// The resource claims to be a Bundle but carries no entry array.
    #[error("Bundle without an 'entry' array; treated as a single resource")]
    BundleWithoutEntries,
}

/// A FHIR candidate with its bundle shape resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedResource {
    /// Identifier of the source document.
    pub source_id: String,

    /// Top-level resource type.
    pub resource_type: String,

    /// True iff the document's `entry` field is an array.
    pub is_bundle: bool,

    /// Set when the shape was ambiguous.
    pub warning: Option<ClassificationWarning>,

    /// Parsed document.
    pub value: Value,
}

impl ClassifiedResource {
    /// Iterate over the bundle's entries, or nothing for a singleton.
    ///
    /// The iterator borrows the document and can be recreated at will.
    pub fn entries(&self) -> BundleEntries<'_> {
        let entries = if self.is_bundle {
            self.value
                .get(ENTRY_KEY)
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
        } else {
            &[]
        };
        BundleEntries::new(self.bundle_id(), entries)
    }

    /// Identifier used as the back-reference for entries of this bundle.
    ///
    /// This is the bundle's own `id` when it is a string, else the source document id.
    pub fn bundle_id(&self) -> &str {
        self.value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(&self.source_id)
    }

    /// Normalize into the resource instances fed to the projector.
    ///
    /// A singleton yields itself; a bundle yields its entries in array order.
    pub fn into_instances(self) -> Vec<ResourceInstance> {
        if self.is_bundle {
            return self
                .entries()
                .map(|entry| entry.into_instance(&self.source_id))
                .collect();
        }
        vec![ResourceInstance {
            source_id: self.source_id,
            resource_type: self.resource_type,
            bundle_id: None,
            entry_index: None,
            payload: self.value,
        }]
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Resolve whether a candidate is a bundle.
///
/// Only an array under `entry` makes a bundle. Anything else present under
/// `entry` is reported as ambiguous and the resource is treated as a singleton.
pub fn classify(candidate: FhirCandidate) -> ClassifiedResource {
    let entry = candidate.value.get(ENTRY_KEY);
    let is_bundle = matches!(entry, Some(Value::Array(_)));

    let warning = match entry {
        Some(Value::Array(_)) => None,
        Some(other) if !other.is_null() => Some(ClassificationWarning::EntryNotArray {
            found: json_kind(other),
        }),
        _ if candidate.resource_type == ResourceType::Bundle.as_str() => {
            Some(ClassificationWarning::BundleWithoutEntries)
        }
        _ => None,
    };

    if let Some(warning) = &warning {
        tracing::warn!(
            source_id = %candidate.source_id,
            resource_type = %candidate.resource_type,
            %warning,
            "Ambiguous resource shape"
        );
    }

    ClassifiedResource {
        source_id: candidate.source_id,
        resource_type: candidate.resource_type,
        is_bundle,
        warning,
        value: candidate.value,
    }
}
