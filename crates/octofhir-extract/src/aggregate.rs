//! Summary statistics over projected records.
//!
//! Aggregates are recomputed on demand from a slice of records; nothing is
//! cached. Records exploded from one resource instance count once.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use time::OffsetDateTime;

use crate::derived::record_age;
use crate::projector::ProjectedRecord;

/// Number of resource instances of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeCount {
    pub resource_type: String,
    pub count: usize,
}

impl TypeCount {
    pub fn new(resource_type: impl Into<String>, count: usize) -> Self {
        Self {
            resource_type: resource_type.into(),
            count,
        }
    }
}

impl From<(&str, usize)> for TypeCount {
    fn from((resource_type, count): (&str, usize)) -> Self {
        Self::new(resource_type, count)
    }
}

/// Count instances per resource type among records accepted by `filter`.
///
/// Sorted by count descending, ties broken by resource type ascending.
pub fn count_by_type<F>(records: &[ProjectedRecord], filter: F) -> Vec<TypeCount>
where
    F: Fn(&ProjectedRecord) -> bool,
{
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in distinct_instances(records).filter(|r| filter(r)) {
        *counts.entry(record.resource_type.as_str()).or_default() += 1;
    }

    let mut result: Vec<TypeCount> = counts
        .into_iter()
        .map(|(resource_type, count)| TypeCount::new(resource_type, count))
        .collect();
    result.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.resource_type.cmp(&b.resource_type))
    });
    result
}

/// Counts of resources that arrived inside bundles.
///
/// Only projected records are counted. Under
/// [`UnsupportedTypePolicy::Skip`](crate::UnsupportedTypePolicy::Skip) a bundled
/// resource whose type has no schema produces no record and is absent here; use
/// [`UnsupportedTypePolicy::Minimal`](crate::UnsupportedTypePolicy::Minimal) to
/// have every bundled type show up.
pub fn bundle_resource_counts(records: &[ProjectedRecord]) -> Vec<TypeCount> {
    count_by_type(records, |r| r.bundle_id.is_some())
}

/// Mean of a numeric column over instances of one type, ignoring nulls.
///
/// Each resource instance contributes once; for exploded records the first
/// row's value is used. `None` when no instance has a numeric value there.
pub fn average(records: &[ProjectedRecord], resource_type: &str, column: &str) -> Option<f64> {
    mean(
        distinct_instances(records)
            .filter(|r| r.resource_type == resource_type)
            .filter_map(|r| r.get(column).as_f64()),
    )
}

/// Mean Patient age in years at `now`, one value per patient.
///
/// `None` when no patient has a birth date.
pub fn average_age(records: &[ProjectedRecord], now: OffsetDateTime) -> Option<f64> {
    mean(distinct_instances(records).filter_map(|r| record_age(r, now)))
}

/// First record of each `(resource_type, source_id, entry_index)` instance, in input order.
fn distinct_instances(records: &[ProjectedRecord]) -> impl Iterator<Item = &ProjectedRecord> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(move |&r| seen.insert((r.resource_type.as_str(), r.instance_key())))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}
