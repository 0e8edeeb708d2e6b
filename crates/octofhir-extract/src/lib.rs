//! Schema-driven extraction of typed records from stored FHIR documents.
//!
//! This crate turns a generic store of JSON documents (one `content` column per
//! row, claimed to be FHIR R4) into flat, typed records that can be consumed
//! like relational tables. Malformed documents are counted, never fatal.
//!
//! # Pipeline
//!
//! ```text
//! RawDocument -> validate -> classify -> unnest bundles -> project -> aggregate
//! ```
//!
//! # Components
//!
//! - [`validate`] - Classifies raw payloads as invalid, non-FHIR JSON, or FHIR candidates
//! - [`classify`] - Resolves resource type and bundle shape
//! - [`BundleEntries`] - Lazy, ordered expansion of bundle entries
//! - [`SchemaRegistry`] - Declarative field mappings per resource type
//! - [`Projector`] - Applies a schema to a resource instance
//! - [`aggregate`] - Counts and averages over projected records
//! - [`Extractor`] - Runs the whole pipeline over iterators or async sources
//! - [`config`] / [`observability`] - File and environment configuration, tracing setup
//!
//! # Example
//!
//! ```ignore
//! use octofhir_extract::{Extractor, RawDocument, SchemaRegistry};
//!
//! let registry = SchemaRegistry::builtin()?;
//! let extractor = Extractor::new(registry);
//! let result = extractor.run(vec![RawDocument::new("row-1", payload)]);
//!
//! let counts = octofhir_extract::aggregate::bundle_resource_counts(&result.records);
//! ```
//!
//! # Configuration and logging
//!
//! A host process usually loads [`config::ExtractConfig`] from a TOML file plus
//! `OCTOFHIR_EXTRACT__*` environment variables, installs the tracing subscriber
//! once, and builds the extractor from the same configuration:
//!
//! ```ignore
//! use octofhir_extract::{Extractor, InMemorySource, aggregate, config, observability};
//! use time::OffsetDateTime;
//!
//! let cfg = config::loader::load_config(Some("extract.toml"))?;
//! observability::init_tracing_from_config(&cfg.logging);
//!
//! let now = OffsetDateTime::now_utc();
//! let extractor = Extractor::from_config(&cfg, Some(now))?;
//! let source = InMemorySource::new(documents);
//! let result = extractor.run_source(&source).await?;
//!
//! // Raise verbosity at runtime without reinstalling the subscriber.
//! observability::apply_logging_level("debug");
//! let mean_age = aggregate::average_age(&result.records, now);
//! ```

pub mod aggregate;
mod bundle;
mod classify;
mod column;
pub mod config;
pub mod derived;
mod document;
pub mod observability;
mod path;
mod projector;
mod registry;
mod runner;
mod schema;
mod source;

pub use bundle::{BundleEntries, BundleEntry, ResourceInstance};
pub use classify::{ClassificationWarning, ClassifiedResource, classify};
pub use column::{ColumnValue, ValueKind};
pub use document::{FhirCandidate, RawDocument, ValidationKind, ValidationResult, validate};
pub use path::{PathExpr, Resolution, Segment};
pub use projector::{
    FieldError, FieldErrorKind, ProjectedRecord, Projection, Projector, UnsupportedTypePolicy,
};
pub use registry::SchemaRegistry;
pub use runner::{ClassificationSummary, DocumentOutcome, ExtractResult, Extractor};
pub use schema::{
    ArrayRule, ColumnDefinition, DefaultPolicy, FieldMapping, ResourceSchema,
    ResourceSchemaBuilder, SchemaDefinition,
};
pub use source::{DocumentSource, InMemorySource};

use thiserror::Error;

/// Errors that abort an extraction run or its setup.
///
/// Malformed documents and fields are not represented here; they surface as
/// [`ValidationResult::Invalid`], [`ClassificationWarning`] and [`FieldError`]
/// values so that one bad row never stops the rest of the corpus.
#[derive(Debug, Error)]
pub enum Error {
    /// A resource schema is malformed (duplicate column, empty name, ...).
    #[error("Invalid schema for {resource_type}: {message}")]
    InvalidSchema {
        resource_type: String,
        message: String,
    },

    /// A path expression in a field mapping cannot be parsed.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The external document source failed.
    #[error("Document source error: {0}")]
    Source(String),

    /// A projection worker task failed to complete.
    #[error("Worker task error: {0}")]
    Task(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_schema(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            resource_type: resource_type.into(),
            message: message.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<::config::ConfigError> for Error {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;
