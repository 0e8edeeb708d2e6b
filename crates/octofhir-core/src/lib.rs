pub mod error;
pub mod fhir;
pub mod time;

pub use error::{CoreError, Result};
pub use fhir::{RESOURCE_TYPE_KEY, ResourceType, is_valid_resource_type_name};
pub use time::{FhirDate, FhirDateTime};
