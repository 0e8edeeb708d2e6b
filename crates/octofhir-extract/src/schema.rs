//! Declarative resource schemas.
//!
//! A [`ResourceSchema`] is an ordered list of [`FieldMapping`]s for one
//! resource type. Schemas are written either with [`ResourceSchemaBuilder`]
//! or as a serialized [`SchemaDefinition`] (shaped after the column list of a
//! SQL-on-FHIR ViewDefinition), and are compiled once: every path is parsed
//! and every column checked before any document is seen.

use std::collections::HashSet;

use octofhir_core::is_valid_resource_type_name;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::column::ValueKind;
use crate::path::PathExpr;
use crate::{Error, Result};

/// What to do when a mapped path is absent or its value cannot be coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultPolicy {
    /// Leave the column null.
    #[default]
    NullIfAbsent,

    /// Leave the column null and flag a field-level error on the record.
    ErrorIfAbsent,
}

/// How un-indexed arrays met along a path are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayRule {
    /// Only explicit `[n]` indexes traverse arrays; anything else is a mismatch.
    #[default]
    Strict,

    /// Collapse any un-indexed array to its first element.
    First,
}

/// Serialized form of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    /// The column name in the output.
    pub name: String,

    /// Path expression to extract the column value.
    pub path: String,

    /// Expected kind of the column.
    #[serde(rename = "type", default)]
    pub kind: ValueKind,

    /// Absent-value policy.
    #[serde(default)]
    pub policy: DefaultPolicy,

    /// Array handling along the path.
    #[serde(default)]
    pub array: ArrayRule,

    /// Human-readable description of the column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Serialized form of a resource schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    /// The FHIR resource type this schema projects (e.g. "Patient").
    pub resource: String,

    /// Description of the schema's purpose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Columns in output order.
    #[serde(default)]
    pub column: Vec<ColumnDefinition>,
}

impl SchemaDefinition {
    /// Parse a schema definition from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not describe a schema.
    pub fn from_json(value: &Value) -> Result<Self> {
        Self::deserialize(value).map_err(|e| Error::invalid_schema("<unknown>", e.to_string()))
    }

    /// Compile into a [`ResourceSchema`].
    pub fn compile(&self) -> Result<ResourceSchema> {
        ResourceSchema::compile(&self.resource, &self.column)
    }
}

/// One compiled column: how to pull one scalar out of a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub name: String,
    pub path: PathExpr,
    pub kind: ValueKind,
    pub policy: DefaultPolicy,
    pub array_rule: ArrayRule,
    pub description: Option<String>,
    pub(crate) plan: MappingPlan,
}

/// Precomputed resolution strategy of a mapping.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MappingPlan {
    /// Resolve the whole path once per instance.
    Direct,

    /// Resolve `suffix` against each element of the array of explode group `group`.
    Exploded {
        group: usize,
        suffix: Option<PathExpr>,
    },
}

/// Ordered field mappings for one resource type. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSchema {
    resource_type: String,
    mappings: Vec<FieldMapping>,
    explode_groups: Vec<PathExpr>,
}

impl ResourceSchema {
    /// Start building a schema for a resource type.
    pub fn builder(resource_type: impl Into<String>) -> ResourceSchemaBuilder {
        ResourceSchemaBuilder {
            resource_type: resource_type.into(),
            columns: Vec::new(),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn mappings(&self) -> &[FieldMapping] {
        &self.mappings
    }

    /// Array prefixes this schema explodes over, in first-use order.
    pub fn explode_groups(&self) -> &[PathExpr] {
        &self.explode_groups
    }

    /// Get the list of all column names defined in this schema.
    pub fn column_names(&self) -> Vec<&str> {
        self.mappings.iter().map(|m| m.name.as_str()).collect()
    }

    fn compile(resource_type: &str, columns: &[ColumnDefinition]) -> Result<Self> {
        if !is_valid_resource_type_name(resource_type) {
            return Err(Error::invalid_schema(resource_type, "invalid resource type name"));
        }
        if columns.is_empty() {
            return Err(Error::invalid_schema(resource_type, "schema declares no columns"));
        }

        let mut seen = HashSet::new();
        let mut explode_groups: Vec<PathExpr> = Vec::new();
        let mut mappings = Vec::with_capacity(columns.len());

        for column in columns {
            let name = column.name.trim();
            if name.is_empty() {
                return Err(Error::invalid_schema(resource_type, "column name is empty"));
            }
            if !seen.insert(name.to_string()) {
                return Err(Error::invalid_schema(
                    resource_type,
                    format!("duplicate column '{name}'"),
                ));
            }

            let path = PathExpr::parse(&column.path)?;
            let plan = match path.explode_split() {
                None => MappingPlan::Direct,
                Some((prefix, suffix)) => {
                    let group = match explode_groups.iter().position(|g| *g == prefix) {
                        Some(existing) => existing,
                        None => {
                            explode_groups.push(prefix);
                            explode_groups.len() - 1
                        }
                    };
                    MappingPlan::Exploded { group, suffix }
                }
            };

            mappings.push(FieldMapping {
                name: name.to_string(),
                path,
                kind: column.kind,
                policy: column.policy,
                array_rule: column.array,
                description: column.description.clone(),
                plan,
            });
        }

        Ok(Self {
            resource_type: resource_type.to_string(),
            mappings,
            explode_groups,
        })
    }
}

/// Fluent builder for [`ResourceSchema`].
///
/// Modifiers such as [`required`](Self::required) apply to the most recently
/// added column. Nothing is validated until [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ResourceSchemaBuilder {
    resource_type: String,
    columns: Vec<ColumnDefinition>,
}

impl ResourceSchemaBuilder {
    /// Add a nullable, strictly indexed column.
    pub fn column(mut self, name: impl Into<String>, path: impl Into<String>, kind: ValueKind) -> Self {
        self.columns.push(ColumnDefinition {
            name: name.into(),
            path: path.into(),
            kind,
            policy: DefaultPolicy::NullIfAbsent,
            array: ArrayRule::Strict,
            description: None,
        });
        self
    }

    /// Shorthand for a string column.
    pub fn string(self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.column(name, path, ValueKind::String)
    }

    /// Flag the last column as error-if-absent.
    pub fn required(mut self) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.policy = DefaultPolicy::ErrorIfAbsent;
        }
        self
    }

    /// Collapse un-indexed arrays on the last column's path to their first element.
    pub fn first(mut self) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.array = ArrayRule::First;
        }
        self
    }

    /// Set the description of the last column.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.description = Some(description.into());
        }
        self
    }

    /// Validate and compile the schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchema`] or [`Error::InvalidPath`] on misconfiguration.
    pub fn build(self) -> Result<ResourceSchema> {
        ResourceSchema::compile(&self.resource_type, &self.columns)
    }

    /// The serialized form of what has been declared so far.
    pub fn into_definition(self) -> SchemaDefinition {
        SchemaDefinition {
            resource: self.resource_type,
            description: None,
            column: self.columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_compiles_columns_in_order() {
        let schema = ResourceSchema::builder("Patient")
            .string("patient_id", "id")
            .required()
            .string("first_name", "name[0].given")
            .first()
            .column("birth_date", "birthDate", ValueKind::Date)
            .build()
            .unwrap();

        assert_eq!(schema.resource_type(), "Patient");
        assert_eq!(schema.column_names(), vec!["patient_id", "first_name", "birth_date"]);
        assert_eq!(schema.mappings()[0].policy, DefaultPolicy::ErrorIfAbsent);
        assert_eq!(schema.mappings()[1].array_rule, ArrayRule::First);
        assert_eq!(schema.mappings()[2].kind, ValueKind::Date);
        assert!(schema.explode_groups().is_empty());
    }

    #[test]
    fn test_explode_groups_share_prefix() {
        let schema = ResourceSchema::builder("Condition")
            .string("id", "id")
            .string("code", "code.coding[*].code")
            .string("system", "code.coding[*].system")
            .string("category", "category[*].coding[0].code")
            .build()
            .unwrap();

        let groups: Vec<_> = schema.explode_groups().iter().map(|g| g.as_str()).collect();
        assert_eq!(groups, vec!["code.coding", "category"]);
        assert_eq!(
            schema.mappings()[2].plan,
            MappingPlan::Exploded {
                group: 0,
                suffix: Some(PathExpr::parse("system").unwrap())
            }
        );
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let err = ResourceSchema::builder("Patient")
            .string("id", "id")
            .string("id", "identifier[0].value")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_bad_path_rejected() {
        let err = ResourceSchema::builder("Patient")
            .string("id", "id..x")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
    }

    #[test]
    fn test_empty_and_unnamed_rejected() {
        assert!(ResourceSchema::builder("Patient").build().is_err());
        assert!(ResourceSchema::builder("Patient").string(" ", "id").build().is_err());
        assert!(ResourceSchema::builder("not-a-type").string("id", "id").build().is_err());
    }

    #[test]
    fn test_parse_schema_definition() {
        let json = json!({
            "resource": "Observation",
            "description": "Vital signs",
            "column": [
                {"name": "observation_id", "path": "id", "policy": "error-if-absent"},
                {"name": "value", "path": "valueQuantity.value", "type": "float"},
                {"name": "effective", "path": "effectiveDateTime", "type": "dateTime"},
                {"name": "code", "path": "code.coding.code", "array": "first"}
            ]
        });

        let definition = SchemaDefinition::from_json(&json).unwrap();
        let schema = definition.compile().unwrap();
        assert_eq!(schema.resource_type(), "Observation");
        assert_eq!(schema.mappings()[0].policy, DefaultPolicy::ErrorIfAbsent);
        assert_eq!(schema.mappings()[1].kind, ValueKind::Float);
        assert_eq!(schema.mappings()[2].kind, ValueKind::DateTime);
        assert_eq!(schema.mappings()[3].array_rule, ArrayRule::First);
    }

    #[test]
    fn test_unknown_value_kind_rejected() {
        let json = json!({
            "resource": "Observation",
            "column": [{"name": "v", "path": "value", "type": "quantity"}]
        });
        assert!(SchemaDefinition::from_json(&json).is_err());
    }

    #[test]
    fn test_builder_into_definition_roundtrip() {
        let definition = ResourceSchema::builder("Encounter")
            .string("encounter_id", "id")
            .describe("Logical id")
            .into_definition();
        let json = serde_json::to_value(&definition).unwrap();
        assert_eq!(json["column"][0]["type"], "string");
        assert_eq!(json["column"][0]["policy"], "null-if-absent");
        assert_eq!(SchemaDefinition::from_json(&json).unwrap(), definition);
    }
}
