//! Pipeline execution.
//!
//! This module provides the [`Extractor`] which drives raw documents through
//! validation, classification, bundle unnesting and projection, and collects
//! the typed records together with a classification summary.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::classify::{ClassificationWarning, classify};
use crate::config::ExtractConfig;
use crate::derived::derive_age;
use crate::document::{RawDocument, ValidationKind, ValidationResult, validate};
use crate::projector::{ProjectedRecord, Projector, UnsupportedTypePolicy};
use crate::registry::SchemaRegistry;
use crate::source::DocumentSource;
use crate::{Error, Result};

const DEFAULT_PAGE_SIZE: usize = 256;
const DEFAULT_CONCURRENCY: usize = 8;

/// Drives documents through the extraction pipeline.
///
/// Cheap to clone: the schema registry is shared behind an `Arc`, so every
/// worker sees the same read-only schemas.
#[derive(Debug, Clone)]
pub struct Extractor {
    projector: Projector,
    derive_age: bool,
    reference_time: Option<OffsetDateTime>,
    page_size: usize,
    concurrency: usize,
}

impl Extractor {
    /// Create an extractor over a registry with default options.
    ///
    /// Derived fields such as Patient `age` are only computed once a reference
    /// time is supplied with [`with_reference_time`](Self::with_reference_time).
    pub fn new(registry: SchemaRegistry) -> Self {
        Self::with_registry(Arc::new(registry))
    }

    /// Create an extractor over an already shared registry.
    pub fn with_registry(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            projector: Projector::new(registry),
            derive_age: true,
            reference_time: None,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Build an extractor from loaded configuration.
    ///
    /// `now` is the reference time for derived fields; `None` disables them
    /// regardless of `pipeline.derive_age`.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured schema fails to compile.
    pub fn from_config(config: &ExtractConfig, now: Option<OffsetDateTime>) -> Result<Self> {
        let registry = config.build_registry()?;
        let mut extractor = Self::new(registry);
        extractor.reference_time = now;
        Ok(extractor
            .with_unsupported_policy(config.pipeline.unsupported_types)
            .with_derive_age(config.pipeline.derive_age)
            .with_paging(config.pipeline.page_size, config.pipeline.concurrency))
    }

    pub fn with_unsupported_policy(mut self, policy: UnsupportedTypePolicy) -> Self {
        self.projector = self.projector.with_unsupported_policy(policy);
        self
    }

    pub fn with_derive_age(mut self, enabled: bool) -> Self {
        self.derive_age = enabled;
        self
    }

    pub fn with_reference_time(mut self, now: OffsetDateTime) -> Self {
        self.reference_time = Some(now);
        self
    }

    /// Page size and worker fan-out used by [`run_source`](Self::run_source).
    /// Zero values are raised to one.
    pub fn with_paging(mut self, page_size: usize, concurrency: usize) -> Self {
        self.page_size = page_size.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        self.projector.registry()
    }

    pub fn reference_time(&self) -> Option<OffsetDateTime> {
        self.reference_time
    }

    /// Process a single document. Never fails: bad input shows up in the outcome.
    pub fn process(&self, doc: &RawDocument) -> DocumentOutcome {
        let validation = validate(doc);
        let kind = validation.kind();

        let candidate = match validation {
            ValidationResult::FhirCandidate(candidate) => candidate,
            ValidationResult::Invalid { .. } | ValidationResult::ValidNonFhir(_) => {
                return DocumentOutcome::empty(&doc.id, kind);
            }
        };

        let classified = classify(candidate);
        let is_bundle = classified.is_bundle;
        let warning = classified.warning.clone();

        let mut records = Vec::new();
        let mut unsupported = 0;
        for instance in classified.into_instances() {
            let projection = self.projector.project(&instance);
            if projection.is_unsupported() {
                unsupported += 1;
            }
            records.extend(projection.into_records());
        }

        if let (true, Some(now)) = (self.derive_age, self.reference_time) {
            derive_age(&mut records, now);
        }

        DocumentOutcome {
            source_id: doc.id.clone(),
            kind,
            is_bundle,
            warning,
            records,
            unsupported,
        }
    }

    /// Run the pipeline over an in-memory sequence of documents, in order.
    pub fn run<I>(&self, documents: I) -> ExtractResult
    where
        I: IntoIterator<Item = RawDocument>,
    {
        let mut result = ExtractResult::default();
        for doc in documents {
            result.absorb(self.process(&doc));
        }
        result.log_totals();
        result
    }

    /// Run the pipeline over a paged async source.
    ///
    /// Each page is projected on blocking worker tasks, at most
    /// `concurrency` at a time; output keeps source order. A failing source
    /// stops the run and the records gathered so far are returned with
    /// [`ExtractResult::interrupted`] set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Task`] if a worker task panics or is cancelled.
    pub async fn run_source(&self, source: &dyn DocumentSource) -> Result<ExtractResult> {
        let mut result = ExtractResult::default();
        let mut offset = 0;

        loop {
            let page = match source.fetch(offset, self.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(offset, error = %e, "Document source failed, stopping run");
                    result.interrupted = true;
                    break;
                }
            };
            let fetched = page.len();
            offset += fetched;

            let outcomes: Vec<_> = stream::iter(page.into_iter().map(|doc| {
                let extractor = self.clone();
                tokio::task::spawn_blocking(move || extractor.process(&doc))
            }))
            .buffered(self.concurrency)
            .collect()
            .await;

            for outcome in outcomes {
                result.absorb(outcome.map_err(|e| Error::Task(e.to_string()))?);
            }

            tracing::debug!(offset, fetched, "Processed page");
            if fetched < self.page_size {
                break;
            }
        }

        result.log_totals();
        Ok(result)
    }
}

/// Everything the pipeline learned about one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentOutcome {
    pub source_id: String,
    pub kind: ValidationKind,
    pub is_bundle: bool,
    pub warning: Option<ClassificationWarning>,
    pub records: Vec<ProjectedRecord>,
    /// Resource instances whose type has no schema.
    pub unsupported: usize,
}

impl DocumentOutcome {
    fn empty(source_id: &str, kind: ValidationKind) -> Self {
        Self {
            source_id: source_id.to_string(),
            kind,
            is_bundle: false,
            warning: None,
            records: Vec::new(),
            unsupported: 0,
        }
    }
}

/// Counts from the classification pass.
///
/// `valid_json + invalid_json == total` and
/// `valid_non_fhir + fhir_candidates == valid_json` always hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationSummary {
    pub total: usize,
    pub valid_json: usize,
    pub invalid_json: usize,
    pub valid_non_fhir: usize,
    /// Documents with a resource-type marker, bundles included.
    pub fhir_candidates: usize,
    pub fhir_bundle_candidates: usize,
    /// Candidates whose bundle shape was ambiguous.
    pub ambiguous: usize,
    /// Ids of documents that failed to parse, in input order.
    pub invalid_json_rows: Vec<String>,
}

impl ClassificationSummary {
    pub fn observe(&mut self, outcome: &DocumentOutcome) {
        self.total += 1;
        match outcome.kind {
            ValidationKind::Invalid => {
                self.invalid_json += 1;
                self.invalid_json_rows.push(outcome.source_id.clone());
                return;
            }
            ValidationKind::ValidNonFhir => self.valid_non_fhir += 1,
            ValidationKind::FhirCandidate => {
                self.fhir_candidates += 1;
                if outcome.is_bundle {
                    self.fhir_bundle_candidates += 1;
                }
                if outcome.warning.is_some() {
                    self.ambiguous += 1;
                }
            }
        }
        self.valid_json += 1;
    }
}

/// Result of an extraction run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractResult {
    pub summary: ClassificationSummary,

    /// Projected records in input order, bundle entries in array order.
    pub records: Vec<ProjectedRecord>,

    /// Resource instances skipped or reduced because their type has no schema.
    pub unsupported: usize,

    /// True when the source failed before being exhausted.
    pub interrupted: bool,
}

impl ExtractResult {
    /// Fold one document outcome into the result.
    pub fn absorb(&mut self, outcome: DocumentOutcome) {
        self.summary.observe(&outcome);
        self.unsupported += outcome.unsupported;
        self.records.extend(outcome.records);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of one resource type, in order.
    pub fn records_of<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a ProjectedRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.resource_type == resource_type)
    }

    /// Records carrying at least one field-level error.
    pub fn records_with_errors(&self) -> impl Iterator<Item = &ProjectedRecord> {
        self.records.iter().filter(|r| !r.is_valid())
    }

    /// Convert the records to a JSON array of flat objects.
    pub fn to_json_array(&self) -> Vec<Value> {
        self.records.iter().map(ProjectedRecord::to_json).collect()
    }

    fn log_totals(&self) {
        tracing::info!(
            total = self.summary.total,
            invalid_json = self.summary.invalid_json,
            fhir_candidates = self.summary.fhir_candidates,
            bundles = self.summary.fhir_bundle_candidates,
            ambiguous = self.summary.ambiguous,
            records = self.records.len(),
            unsupported = self.unsupported,
            interrupted = self.interrupted,
            "Extraction finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn extractor() -> Extractor {
        Extractor::new(SchemaRegistry::builtin().unwrap())
            .with_reference_time(datetime!(2024-01-01 00:00 UTC))
    }

    #[test]
    fn test_process_invalid_document() {
        let outcome = extractor().process(&RawDocument::new("bad", "not json"));
        assert_eq!(outcome.kind, ValidationKind::Invalid);
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_process_singleton_derives_age() {
        let outcome = extractor().process(&RawDocument::new(
            "row-1",
            r#"{"resourceType":"Patient","id":"p1","birthDate":"1990-01-01"}"#,
        ));
        assert_eq!(outcome.kind, ValidationKind::FhirCandidate);
        assert!(!outcome.is_bundle);
        assert_eq!(outcome.records.len(), 1);
        let age = outcome.records[0].get("age").as_f64().unwrap();
        assert!((age - 34.0).abs() < 0.01);
    }

    #[test]
    fn test_derive_age_disabled() {
        let outcome = extractor().with_derive_age(false).process(&RawDocument::new(
            "row-1",
            r#"{"resourceType":"Patient","id":"p1","birthDate":"1990-01-01"}"#,
        ));
        assert!(!outcome.records[0].columns.contains_key("age"));
    }

    #[test]
    fn test_no_reference_time_skips_age() {
        let extractor = Extractor::new(SchemaRegistry::builtin().unwrap());
        assert!(extractor.reference_time().is_none());
        let outcome = extractor.process(&RawDocument::new(
            "row-1",
            r#"{"resourceType":"Patient","id":"p1","birthDate":"1990-01-01"}"#,
        ));
        assert!(!outcome.records[0].columns.contains_key("age"));
    }

    #[test]
    fn test_from_config_takes_reference_time() {
        let config = ExtractConfig::default();
        let now = datetime!(2024-01-01 00:00 UTC);
        let extractor = Extractor::from_config(&config, Some(now)).unwrap();
        assert_eq!(extractor.reference_time(), Some(now));
        assert!(Extractor::from_config(&config, None).unwrap().reference_time().is_none());
    }

    #[test]
    fn test_unsupported_counted() {
        let outcome = extractor().process(&RawDocument::new(
            "row-1",
            r#"{"resourceType":"Observation","id":"o1"}"#,
        ));
        assert_eq!(outcome.unsupported, 1);
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_summary_invariants() {
        let result = extractor().run(vec![
            RawDocument::new("1", "not json"),
            RawDocument::new("2", r#"{"hello":"world"}"#),
            RawDocument::new("3", r#"{"resourceType":"Patient","id":"p"}"#),
            RawDocument::new("4", r#"{"resourceType":"Bundle","entry":[]}"#),
            RawDocument::new("5", r#"{"resourceType":"Bundle","entry":{}}"#),
        ]);
        let s = &result.summary;
        assert_eq!(s.total, 5);
        assert_eq!(s.valid_json + s.invalid_json, s.total);
        assert_eq!(s.valid_non_fhir + s.fhir_candidates, s.valid_json);
        assert_eq!(s.fhir_candidates, 3);
        assert_eq!(s.fhir_bundle_candidates, 1);
        assert_eq!(s.ambiguous, 1);
        assert_eq!(s.invalid_json_rows, vec!["1".to_string()]);
    }

    #[test]
    fn test_result_helpers() {
        let result = extractor().run(vec![
            RawDocument::new("1", r#"{"resourceType":"Patient","id":"p1"}"#),
            RawDocument::new("2", r#"{"resourceType":"Condition"}"#),
        ]);
        assert_eq!(result.records_of("Patient").count(), 1);
        assert_eq!(result.records_with_errors().count(), 1);

        let json = result.to_json_array();
        assert_eq!(json.len(), 2);
        assert_eq!(json[0]["patient_id"], "p1");
        assert_eq!(json[1]["resource_type"], "Condition");
    }
}
