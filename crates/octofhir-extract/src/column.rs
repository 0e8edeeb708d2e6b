//! Column value kinds and typed scalar values.
//!
//! This module defines the closed set of kinds a field mapping can declare and
//! the coercion of raw JSON scalars into typed values.

use std::fmt;
use std::str::FromStr;

use octofhir_core::{FhirDate, FhirDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Data types supported by projected columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    /// String/text values.
    #[default]
    String,

    /// Integer values.
    Integer,

    /// Floating-point values.
    Float,

    /// Calendar date values (YYYY-MM-DD).
    Date,

    /// DateTime values (RFC 3339 / FHIR instant).
    DateTime,

    /// Boolean values.
    Boolean,
}

impl ValueKind {
    /// Parse a value kind from a FHIR primitive type name.
    ///
    /// Returns `None` for unknown names so schema loading can reject them.
    pub fn from_fhir_type(type_str: &str) -> Option<Self> {
        match type_str.to_lowercase().as_str() {
            "string" | "code" | "uri" | "url" | "canonical" | "id" | "oid" | "uuid"
            | "markdown" => Some(Self::String),
            "integer" | "positiveint" | "unsignedint" | "integer64" => Some(Self::Integer),
            "float" | "decimal" => Some(Self::Float),
            "date" => Some(Self::Date),
            "datetime" | "instant" => Some(Self::DateTime),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }

    /// Coerce a resolved JSON value to this kind.
    ///
    /// Strings accept any scalar verbatim. Numeric and boolean kinds accept
    /// their JSON type or a string spelling of it. Objects and arrays never
    /// coerce.
    pub fn coerce(&self, value: &Value) -> Option<ColumnValue> {
        match (self, value) {
            (_, Value::Null | Value::Array(_) | Value::Object(_)) => None,

            (Self::String, Value::String(s)) => Some(ColumnValue::String(s.clone())),
            (Self::String, Value::Number(n)) => Some(ColumnValue::String(n.to_string())),
            (Self::String, Value::Bool(b)) => Some(ColumnValue::String(b.to_string())),

            (Self::Integer, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().and_then(integral))
                .map(ColumnValue::Integer),
            (Self::Integer, Value::String(s)) => s.trim().parse().ok().map(ColumnValue::Integer),

            (Self::Float, Value::Number(n)) => n.as_f64().map(ColumnValue::Float),
            (Self::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(ColumnValue::Float),

            (Self::Boolean, Value::Bool(b)) => Some(ColumnValue::Boolean(*b)),
            (Self::Boolean, Value::String(s)) => match s.trim() {
                "true" => Some(ColumnValue::Boolean(true)),
                "false" => Some(ColumnValue::Boolean(false)),
                _ => None,
            },

            (Self::Date, Value::String(s)) => FhirDate::from_str(s).ok().map(ColumnValue::Date),
            (Self::DateTime, Value::String(s)) => {
                FhirDateTime::from_str(s).ok().map(ColumnValue::DateTime)
            }

            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ValueKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_fhir_type(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown value kind '{s}'")))
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::Date => write!(f, "date"),
            Self::DateTime => write!(f, "dateTime"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

/// A typed scalar in a projected record. Absent fields are `Null`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ColumnValue {
    #[default]
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Date(FhirDate),
    DateTime(FhirDateTime),
    Boolean(bool),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<FhirDate> {
        match self {
            Self::Date(d) => Some(*d),
            Self::DateTime(dt) => Some(dt.date()),
            _ => None,
        }
    }

    /// Numeric view used by averaging aggregates.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Convert to JSON. Dates render as FHIR strings.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::String(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::Number((*i).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Date(d) => Value::String(d.to_string()),
            Self::DateTime(dt) => Value::String(dt.to_string()),
            Self::Boolean(b) => Value::Bool(*b),
        }
    }
}

impl Serialize for ColumnValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for ColumnValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// `5.0` is an integer; `5.5` and values outside `i64` are not.
fn integral(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    (f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then_some(f as i64)
}
