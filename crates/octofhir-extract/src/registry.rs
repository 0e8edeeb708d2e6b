//! Schema registry with the built-in resource tables.
//!
//! Supporting a new resource type means adding one schema here (or in
//! configuration), never new projection code.

use std::collections::HashMap;

use octofhir_core::ResourceType;

use crate::column::ValueKind;
use crate::schema::{ResourceSchema, SchemaDefinition};
use crate::{Error, Result};

/// Read-only lookup of [`ResourceSchema`] by resource type.
///
/// Built once at startup and shared (usually behind an `Arc`) by all workers.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, ResourceSchema>,
}

impl SchemaRegistry {
    /// An empty registry: every resource type is unsupported.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in Patient, Encounter, Condition and
    /// ServiceRequest schemas.
    ///
    /// # Errors
    ///
    /// Fails only if a built-in table is malformed.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::empty();
        for schema in [
            patient_schema()?,
            encounter_schema()?,
            condition_schema()?,
            service_request_schema()?,
        ] {
            registry.register(schema)?;
        }
        Ok(registry)
    }

    /// Add a schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchema`] if the resource type is already registered.
    pub fn register(&mut self, schema: ResourceSchema) -> Result<()> {
        let resource_type = schema.resource_type().to_string();
        if self.schemas.contains_key(&resource_type) {
            return Err(Error::invalid_schema(resource_type, "schema registered twice"));
        }
        self.schemas.insert(resource_type, schema);
        Ok(())
    }

    /// Add or replace a schema, returning the previous one.
    pub fn replace(&mut self, schema: ResourceSchema) -> Option<ResourceSchema> {
        self.schemas.insert(schema.resource_type().to_string(), schema)
    }

    /// Compile and register serialized definitions, replacing built-ins of the same type.
    pub fn extend_from_definitions(&mut self, definitions: &[SchemaDefinition]) -> Result<()> {
        for definition in definitions {
            let schema = definition.compile()?;
            if self.replace(schema).is_some() {
                tracing::info!(resource_type = %definition.resource, "Schema overridden");
            }
        }
        Ok(())
    }

    /// Look up the schema for a resource type. `None` means "not supported".
    pub fn lookup(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.schemas.get(resource_type)
    }

    /// Supported resource types, sorted.
    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

fn patient_schema() -> Result<ResourceSchema> {
    ResourceSchema::builder(ResourceType::Patient.as_str())
        .string("patient_id", "id")
        .required()
        .string("first_name", "name[0].given")
        .first()
        .string("last_name", "name[0].family")
        .string("gender", "gender")
        .column("birth_date", "birthDate", ValueKind::Date)
        .string("address_line", "address[0].line")
        .first()
        .string("city", "address[0].city")
        .string("state", "address[0].state")
        .string("postal_code", "address[0].postalCode")
        .string("country", "address[0].country")
        .build()
}

fn encounter_schema() -> Result<ResourceSchema> {
    ResourceSchema::builder(ResourceType::Encounter.as_str())
        .string("encounter_id", "id")
        .required()
        .column("last_updated", "meta.lastUpdated", ValueKind::DateTime)
        .string("type_code", "type[0].coding[0].code")
        .string("type_system", "type[0].coding[0].system")
        .string("type_display", "type[0].coding[0].display")
        .string("class_code", "class.code")
        .string("class_system", "class.system")
        .string("class_display", "class.display")
        .column("period_start", "period.start", ValueKind::DateTime)
        .column("period_end", "period.end", ValueKind::DateTime)
        .string("status", "status")
        .string("subject_display", "subject.display")
        .string("subject_reference", "subject.reference")
        .string("location", "location[0].location.reference")
        .string("diagnosis_reference", "diagnosis[0].condition.reference")
        .string("extension_url", "extension[0].url")
        .string("extension_value", "extension[0].valueString")
        .string("identifier_value", "identifier[0].value")
        .string("reason_code", "reasonCode[0].coding[*].code")
        .describe("One row per reason coding")
        .string("reason_system", "reasonCode[0].coding[*].system")
        .string("reason_display", "reasonCode[0].coding[*].display")
        .string("service_type_code", "serviceType.coding[0].code")
        .string("service_type_system", "serviceType.coding[0].system")
        .string("service_type_display", "serviceType.coding[0].display")
        .string("admission_code", "hospitalization.admitSource.coding[0].code")
        .string(
            "discharge_code",
            "hospitalization.dischargeDisposition.coding[0].code",
        )
        .string("reason_reference", "reasonReference[0].reference")
        .build()
}

fn condition_schema() -> Result<ResourceSchema> {
    ResourceSchema::builder(ResourceType::Condition.as_str())
        .string("condition_id", "id")
        .required()
        .string("code", "code.coding[0].code")
        .string("code_system", "code.coding[0].system")
        .string("code_display", "code.coding[0].display")
        .column("last_updated", "meta.lastUpdated", ValueKind::DateTime)
        .string("subject_display", "subject.display")
        .string("subject_reference", "subject.reference")
        .string("encounter_display", "encounter.display")
        .string("encounter_reference", "encounter.reference")
        .column("onset_date_time", "onsetDateTime", ValueKind::DateTime)
        .string("category_code", "category[0].coding[0].code")
        .string("category_system", "category[0].coding[0].system")
        .build()
}

fn service_request_schema() -> Result<ResourceSchema> {
    ResourceSchema::builder(ResourceType::ServiceRequest.as_str())
        .string("service_request_id", "id")
        .required()
        .column("last_updated", "meta.lastUpdated", ValueKind::DateTime)
        .string("code", "code.coding[0].code")
        .string("code_system", "code.coding[0].system")
        .string("code_display", "code.coding[0].display")
        .string("category_code", "category[0].coding[0].code")
        .string("category_system", "category[0].coding[0].system")
        .string("category_display", "category[0].coding[0].display")
        .string("intent", "intent")
        .string("status", "status")
        .string("subject_display", "subject.display")
        .string("subject_reference", "subject.reference")
        .string("encounter_display", "encounter.display")
        .string("encounter_reference", "encounter.reference")
        .column("occurrence_start", "occurrencePeriod.start", ValueKind::DateTime)
        .column("occurrence_end", "occurrencePeriod.end", ValueKind::DateTime)
        .column("occurrence_date_time", "occurrenceDateTime", ValueKind::DateTime)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_registry() {
        let registry = SchemaRegistry::builtin().unwrap();
        assert_eq!(
            registry.resource_types(),
            vec!["Condition", "Encounter", "Patient", "ServiceRequest"]
        );
        assert!(registry.lookup("Observation").is_none());
        assert!(registry.lookup("Bundle").is_none());
    }

    #[test]
    fn test_patient_columns() {
        let registry = SchemaRegistry::builtin().unwrap();
        let patient = registry.lookup("Patient").unwrap();
        assert_eq!(
            patient.column_names(),
            vec![
                "patient_id",
                "first_name",
                "last_name",
                "gender",
                "birth_date",
                "address_line",
                "city",
                "state",
                "postal_code",
                "country"
            ]
        );
    }

    #[test]
    fn test_encounter_explodes_reason_codes() {
        let registry = SchemaRegistry::builtin().unwrap();
        let encounter = registry.lookup("Encounter").unwrap();
        let groups: Vec<_> = encounter.explode_groups().iter().map(|g| g.as_str()).collect();
        assert_eq!(groups, vec!["reasonCode[0].coding"]);
    }

    #[test]
    fn test_register_twice_rejected() {
        let mut registry = SchemaRegistry::builtin().unwrap();
        let err = registry.register(patient_schema().unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_extend_from_definitions() {
        let mut registry = SchemaRegistry::builtin().unwrap();
        let observation = SchemaDefinition::from_json(&json!({
            "resource": "Observation",
            "column": [{"name": "observation_id", "path": "id"}]
        }))
        .unwrap();

        registry.extend_from_definitions(&[observation]).unwrap();
        assert_eq!(registry.len(), 5);
        assert!(registry.lookup("Observation").is_some());
    }

    #[test]
    fn test_extend_rejects_bad_definition() {
        let mut registry = SchemaRegistry::empty();
        let broken = SchemaDefinition::from_json(&json!({
            "resource": "Observation",
            "column": [{"name": "v", "path": "value[[0]"}]
        }))
        .unwrap();
        assert!(registry.extend_from_definitions(&[broken]).is_err());
        assert!(registry.is_empty());
    }
}
