//! Projection of resource instances into typed records.
//!
//! One projector serves every resource type: the per-type knowledge lives in
//! the [`ResourceSchema`], the projector only resolves paths, coerces values
//! and applies default policies.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bundle::ResourceInstance;
use crate::column::{ColumnValue, ValueKind};
use crate::path::{Resolution, finish};
use crate::registry::SchemaRegistry;
use crate::schema::{ArrayRule, DefaultPolicy, FieldMapping, MappingPlan, ResourceSchema};

static NULL: ColumnValue = ColumnValue::Null;

/// What to emit for resource types without a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsupportedTypePolicy {
    /// Emit nothing.
    #[default]
    Skip,

    /// Emit a record carrying only the resource type and provenance.
    Minimal,
}

/// Why a mapped field could not be filled.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldErrorKind {
    #[error("required value is absent")]
    Missing,

    #[error("value {found} cannot be read as {expected}")]
    Coercion { expected: ValueKind, found: String },

    #[error("array found where a single value was expected")]
    UnexpectedArray,
}

/// A field-level error attached to a record. The record is still emitted.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[error("{column} ({path}): {kind}")]
pub struct FieldError {
    pub column: String,
    pub path: String,
    pub kind: FieldErrorKind,
}

/// A typed, flat record projected from one resource instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedRecord {
    pub resource_type: String,
    pub source_id: String,
    pub bundle_id: Option<String>,
    pub entry_index: Option<usize>,
    pub columns: IndexMap<String, ColumnValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl ProjectedRecord {
    fn empty(instance: &ResourceInstance) -> Self {
        Self {
            resource_type: instance.resource_type.clone(),
            source_id: instance.source_id.clone(),
            bundle_id: instance.bundle_id.clone(),
            entry_index: instance.entry_index,
            columns: IndexMap::new(),
            errors: Vec::new(),
        }
    }

    /// Value of a column; unknown columns read as null.
    pub fn get(&self, column: &str) -> &ColumnValue {
        self.columns.get(column).unwrap_or(&NULL)
    }

    /// Set a column, appending it if new. Used by derived-field passes.
    pub fn insert(&mut self, column: impl Into<String>, value: ColumnValue) {
        self.columns.insert(column.into(), value);
    }

    /// True when no field-level error was flagged.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Identity of the resource instance this record came from.
    pub fn instance_key(&self) -> (&str, Option<usize>) {
        (&self.source_id, self.entry_index)
    }

    /// Flatten to a JSON object: provenance first, then columns in schema order.
    pub fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("resource_type".into(), Value::String(self.resource_type.clone()));
        obj.insert(
            "bundle_id".into(),
            self.bundle_id.clone().map(Value::String).unwrap_or(Value::Null),
        );
        for (name, value) in &self.columns {
            obj.insert(name.clone(), value.to_json());
        }
        Value::Object(obj)
    }
}

/// Result of projecting one instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// The type has a schema. Usually one record; more when the schema explodes arrays.
    Records(Vec<ProjectedRecord>),

    /// No schema for this type. Holds the minimal record if the policy asks for one.
    Unsupported(Option<ProjectedRecord>),
}

impl Projection {
    pub fn into_records(self) -> Vec<ProjectedRecord> {
        match self {
            Self::Records(records) => records,
            Self::Unsupported(minimal) => minimal.into_iter().collect(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

/// Schema-driven projector. Cheap to clone; the registry is shared.
#[derive(Debug, Clone)]
pub struct Projector {
    registry: Arc<SchemaRegistry>,
    unsupported: UnsupportedTypePolicy,
}

impl Projector {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            unsupported: UnsupportedTypePolicy::default(),
        }
    }

    pub fn with_unsupported_policy(mut self, policy: UnsupportedTypePolicy) -> Self {
        self.unsupported = policy;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Project an instance using the schema registered for its type.
    pub fn project(&self, instance: &ResourceInstance) -> Projection {
        match self.registry.lookup(&instance.resource_type) {
            Some(schema) => Projection::Records(Self::apply(schema, instance)),
            None => {
                tracing::debug!(
                    resource_type = %instance.resource_type,
                    source_id = %instance.source_id,
                    "No schema for resource type"
                );
                let minimal = match self.unsupported {
                    UnsupportedTypePolicy::Skip => None,
                    UnsupportedTypePolicy::Minimal => Some(ProjectedRecord::empty(instance)),
                };
                Projection::Unsupported(minimal)
            }
        }
    }

    /// Apply a schema to an instance.
    ///
    /// Direct mappings are resolved once. Each explode group multiplies the
    /// records by the length of its array (an empty array counts as one
    /// element of nulls), in schema order.
    pub fn apply(schema: &ResourceSchema, instance: &ResourceInstance) -> Vec<ProjectedRecord> {
        let payload = &instance.payload;
        let mut base = ProjectedRecord::empty(instance);

        for mapping in schema.mappings() {
            let value = match mapping.plan {
                MappingPlan::Direct => {
                    fill(&mut base, mapping, mapping.path.resolve(payload, mapping.array_rule))
                }
                MappingPlan::Exploded { .. } => ColumnValue::Null,
            };
            base.columns.insert(mapping.name.clone(), value);
        }

        let mut records = vec![base];
        for (group, prefix) in schema.explode_groups().iter().enumerate() {
            let elements: Vec<Option<&Value>> = match prefix.walk(payload, ArrayRule::Strict) {
                Resolution::Found(Value::Array(items)) if !items.is_empty() => {
                    items.iter().map(Some).collect()
                }
                Resolution::Found(Value::Array(_) | Value::Null) => vec![None],
                Resolution::Found(single) => vec![Some(single)],
                Resolution::Absent | Resolution::UnexpectedArray => vec![None],
            };

            let members: Vec<_> = schema
                .mappings()
                .iter()
                .filter_map(|m| match &m.plan {
                    MappingPlan::Exploded { group: g, suffix } if *g == group => Some((m, suffix)),
                    _ => None,
                })
                .collect();

            let mut expanded = Vec::with_capacity(records.len() * elements.len());
            for record in &records {
                for element in &elements {
                    let mut row = record.clone();
                    for (mapping, suffix) in &members {
                        let resolution = match (element, suffix) {
                            (None, _) => Resolution::Absent,
                            (Some(node), Some(suffix)) => suffix.resolve(node, mapping.array_rule),
                            (Some(node), None) => finish(node, mapping.array_rule),
                        };
                        let value = fill(&mut row, mapping, resolution);
                        row.columns.insert(mapping.name.clone(), value);
                    }
                    expanded.push(row);
                }
            }
            records = expanded;
        }

        records
    }
}

/// Turn a resolution into a column value, recording field errors per policy.
fn fill(record: &mut ProjectedRecord, mapping: &FieldMapping, resolution: Resolution<'_>) -> ColumnValue {
    let failure = match resolution {
        Resolution::Found(value) => match mapping.kind.coerce(value) {
            Some(typed) => return typed,
            None => FieldErrorKind::Coercion {
                expected: mapping.kind,
                found: describe(value),
            },
        },
        Resolution::Absent => FieldErrorKind::Missing,
        Resolution::UnexpectedArray => FieldErrorKind::UnexpectedArray,
    };

    match mapping.policy {
        DefaultPolicy::ErrorIfAbsent => {
            record.errors.push(FieldError {
                column: mapping.name.clone(),
                path: mapping.path.to_string(),
                kind: failure,
            });
        }
        DefaultPolicy::NullIfAbsent if failure != FieldErrorKind::Missing => {
            tracing::debug!(
                column = %mapping.name,
                source_id = %record.source_id,
                error = %failure,
                "Field nulled"
            );
        }
        DefaultPolicy::NullIfAbsent => {}
    }
    ColumnValue::Null
}

fn describe(value: &Value) -> String {
    match value {
        Value::Object(_) => "object".to_string(),
        Value::Array(_) => "array".to_string(),
        scalar => {
            let text = scalar.to_string();
            if text.chars().count() > 64 {
                format!("{}...", text.chars().take(64).collect::<String>())
            } else {
                text
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_core::FhirDate;
    use serde_json::json;
    use time::macros::date;

    fn instance(payload: Value) -> ResourceInstance {
        ResourceInstance {
            source_id: "row-1".to_string(),
            resource_type: payload["resourceType"].as_str().unwrap().to_string(),
            bundle_id: None,
            entry_index: None,
            payload,
        }
    }

    fn projector() -> Projector {
        Projector::new(Arc::new(SchemaRegistry::builtin().unwrap()))
    }

    #[test]
    fn test_patient_projection() {
        let patient = instance(json!({
            "resourceType": "Patient",
            "id": "p1",
            "name": [{"family": "Doe", "given": ["Jane", "Q"]}],
            "gender": "female",
            "birthDate": "1990-01-01",
            "address": [{
                "line": ["1 Main St", "Apt 2"],
                "city": "Springfield",
                "state": "IL",
                "postalCode": "62701",
                "country": "US"
            }]
        }));

        let records = projector().project(&patient).into_records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.is_valid());
        assert_eq!(record.get("patient_id").as_str(), Some("p1"));
        assert_eq!(record.get("first_name").as_str(), Some("Jane"));
        assert_eq!(record.get("last_name").as_str(), Some("Doe"));
        assert_eq!(record.get("address_line").as_str(), Some("1 Main St"));
        assert_eq!(record.get("postal_code").as_str(), Some("62701"));
        assert_eq!(
            record.get("birth_date"),
            &ColumnValue::Date(FhirDate::new(date!(1990 - 01 - 01)))
        );
    }

    #[test]
    fn test_absent_fields_are_null() {
        let records = projector()
            .project(&instance(json!({"resourceType": "Patient", "id": "p2"})))
            .into_records();
        let record = &records[0];
        assert!(record.is_valid());
        assert_eq!(record.get("patient_id").as_str(), Some("p2"));
        for (name, value) in &record.columns {
            if name != "patient_id" {
                assert!(value.is_null(), "{name} should be null");
            }
        }
    }

    #[test]
    fn test_required_missing_flags_error_but_emits() {
        let records = projector()
            .project(&instance(json!({"resourceType": "Patient", "gender": "male"})))
            .into_records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(!record.is_valid());
        assert_eq!(record.errors[0].column, "patient_id");
        assert_eq!(record.errors[0].kind, FieldErrorKind::Missing);
        assert_eq!(record.get("gender").as_str(), Some("male"));
    }

    #[test]
    fn test_bad_date_is_null_without_error() {
        let records = projector()
            .project(&instance(json!({
                "resourceType": "Patient",
                "id": "p3",
                "birthDate": "sometime in 1990"
            })))
            .into_records();
        assert!(records[0].get("birth_date").is_null());
        assert!(records[0].is_valid());
    }

    #[test]
    fn test_coercion_error_under_error_policy() {
        let schema = ResourceSchema::builder("Observation")
            .column("value", "valueInteger", ValueKind::Integer)
            .required()
            .build()
            .unwrap();
        let records = Projector::apply(
            &schema,
            &instance(json!({"resourceType": "Observation", "valueInteger": "seven"})),
        );
        assert!(records[0].get("value").is_null());
        assert_eq!(
            records[0].errors[0].kind,
            FieldErrorKind::Coercion {
                expected: ValueKind::Integer,
                found: "\"seven\"".to_string()
            }
        );
    }

    #[test]
    fn test_unindexed_array_is_mismatch_under_strict() {
        let schema = ResourceSchema::builder("Patient")
            .string("given", "name[0].given")
            .required()
            .build()
            .unwrap();
        let records = Projector::apply(
            &schema,
            &instance(json!({"resourceType": "Patient", "name": [{"given": ["A", "B"]}]})),
        );
        assert!(records[0].get("given").is_null());
        assert_eq!(records[0].errors[0].kind, FieldErrorKind::UnexpectedArray);
    }

    #[test]
    fn test_explode_produces_one_record_per_element() {
        let encounter = instance(json!({
            "resourceType": "Encounter",
            "id": "e1",
            "status": "finished",
            "reasonCode": [{"coding": [
                {"system": "http://snomed.info/sct", "code": "1"},
                {"system": "http://snomed.info/sct", "code": "2"},
                {"system": "http://hl7.org/fhir/sid/icd-10", "code": "3"}
            ]}]
        }));

        let records = projector().project(&encounter).into_records();
        let codes: Vec<_> = records
            .iter()
            .map(|r| r.get("reason_code").as_str().unwrap())
            .collect();
        assert_eq!(codes, vec!["1", "2", "3"]);
        assert!(records.iter().all(|r| r.get("encounter_id").as_str() == Some("e1")));
        assert!(records.iter().all(|r| r.get("status").as_str() == Some("finished")));
        assert_eq!(records[2].get("reason_system").as_str(), Some("http://hl7.org/fhir/sid/icd-10"));
    }

    #[test]
    fn test_explode_empty_keeps_one_null_row() {
        let encounter = instance(json!({"resourceType": "Encounter", "id": "e2", "reasonCode": []}));
        let records = projector().project(&encounter).into_records();
        assert_eq!(records.len(), 1);
        assert!(records[0].get("reason_code").is_null());
        assert_eq!(records[0].get("encounter_id").as_str(), Some("e2"));
    }

    #[test]
    fn test_explode_groups_form_cartesian_product() {
        let schema = ResourceSchema::builder("Patient")
            .string("given", "name[0].given[*]")
            .string("phone", "telecom[*].value")
            .build()
            .unwrap();
        let records = Projector::apply(
            &schema,
            &instance(json!({
                "resourceType": "Patient",
                "name": [{"given": ["A", "B"]}],
                "telecom": [{"value": "1"}, {"value": "2"}, {"value": "3"}]
            })),
        );
        let pairs: Vec<_> = records
            .iter()
            .map(|r| (r.get("given").as_str().unwrap(), r.get("phone").as_str().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![("A", "1"), ("A", "2"), ("A", "3"), ("B", "1"), ("B", "2"), ("B", "3")]
        );
    }

    #[test]
    fn test_unsupported_policy() {
        let observation = instance(json!({"resourceType": "Observation", "id": "o1"}));

        let skipped = projector().project(&observation);
        assert_eq!(skipped, Projection::Unsupported(None));
        assert!(skipped.into_records().is_empty());

        let minimal = projector()
            .with_unsupported_policy(UnsupportedTypePolicy::Minimal)
            .project(&observation);
        assert!(minimal.is_unsupported());
        let records = minimal.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resource_type, "Observation");
        assert!(records[0].columns.is_empty());
    }

    #[test]
    fn test_record_to_json() {
        let mut bundled = instance(json!({"resourceType": "Patient", "id": "p1"}));
        bundled.bundle_id = Some("b1".to_string());
        let records = projector().project(&bundled).into_records();
        let json = records[0].to_json();
        assert_eq!(json["resource_type"], "Patient");
        assert_eq!(json["bundle_id"], "b1");
        assert_eq!(json["patient_id"], "p1");
        assert_eq!(json["birth_date"], Value::Null);
    }

    #[test]
    fn test_string_roundtrip_is_exact() {
        let text = "  Ωmega\t\"quoted\" \u{1F600} ";
        let records = projector()
            .project(&instance(json!({"resourceType": "Patient", "id": text})))
            .into_records();
        assert_eq!(records[0].to_json()["patient_id"], json!(text));
    }
}
