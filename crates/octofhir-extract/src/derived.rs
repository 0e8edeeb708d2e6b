//! Derived fields computed after projection.
//!
//! Derivations read already-projected columns and never the raw payload. The
//! reference time is always passed in so results are reproducible.

use octofhir_core::{FhirDate, ResourceType};
use time::OffsetDateTime;

use crate::column::ColumnValue;
use crate::projector::ProjectedRecord;

/// Average length of a year in days, as used for age in years.
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Column added to Patient records by [`derive_age`].
pub const AGE_COLUMN: &str = "age";

const BIRTH_DATE_COLUMN: &str = "birth_date";

/// Age in fractional years between a birth date and `now`.
///
/// Negative for birth dates after `now`.
pub fn age_years(birth: FhirDate, now: OffsetDateTime) -> f64 {
    let days = (now.date() - birth.into_inner()).whole_days();
    days as f64 / DAYS_PER_YEAR
}

/// Age of a single record, if it is a Patient with a birth date.
pub fn record_age(record: &ProjectedRecord, now: OffsetDateTime) -> Option<f64> {
    if record.resource_type != ResourceType::Patient.as_str() {
        return None;
    }
    record
        .get(BIRTH_DATE_COLUMN)
        .as_date()
        .map(|birth| age_years(birth, now))
}

/// Add an `age` column to every Patient record. Records without a birth date get null.
pub fn derive_age(records: &mut [ProjectedRecord], now: OffsetDateTime) {
    let patient = ResourceType::Patient;
    for record in records.iter_mut().filter(|r| r.resource_type == patient.as_str()) {
        let age = record_age(record, now)
            .map(ColumnValue::Float)
            .unwrap_or_default();
        record.insert(AGE_COLUMN, age);
    }
}
