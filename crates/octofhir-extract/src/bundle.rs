//! Bundle unnesting.
//!
//! A bundle's `entry` array is walked lazily and in order. Each element must
//! wrap its payload in a `resource` object carrying a resource type; elements
//! that do not are skipped, never fatal.

use serde::Serialize;
use serde_json::Value;

use crate::document::resource_type_of;

/// Key of the embedded resource inside a bundle entry.
const RESOURCE_KEY: &str = "resource";

/// One resource extracted from a bundle, borrowed from the parent document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BundleEntry<'a> {
    /// Back-reference to the parent bundle (lookup only).
    pub bundle_id: &'a str,

    /// Position of the entry in the bundle's `entry` array.
    pub index: usize,

    /// Resource type of the embedded resource.
    pub resource_type: &'a str,

    /// The embedded resource.
    pub resource: &'a Value,
}

impl BundleEntry<'_> {
    /// Copy this entry out of the parent document as a projector input.
    pub fn into_instance(self, source_id: &str) -> ResourceInstance {
        ResourceInstance {
            source_id: source_id.to_string(),
            resource_type: self.resource_type.to_string(),
            bundle_id: Some(self.bundle_id.to_string()),
            entry_index: Some(self.index),
            payload: self.resource.clone(),
        }
    }
}

/// Lazy iterator over the usable entries of a bundle, in source order.
///
/// Cloning yields an independent cursor over the same entries.
#[derive(Debug, Clone)]
pub struct BundleEntries<'a> {
    bundle_id: &'a str,
    entries: std::iter::Enumerate<std::slice::Iter<'a, Value>>,
}

impl<'a> BundleEntries<'a> {
    pub(crate) fn new(bundle_id: &'a str, entries: &'a [Value]) -> Self {
        Self {
            bundle_id,
            entries: entries.iter().enumerate(),
        }
    }
}

impl<'a> Iterator for BundleEntries<'a> {
    type Item = BundleEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        for (index, entry) in self.entries.by_ref() {
            let Some(resource) = entry.get(RESOURCE_KEY).filter(|r| r.is_object()) else {
                tracing::debug!(bundle_id = self.bundle_id, index, "Skipping entry without resource");
                continue;
            };
            let Some(resource_type) = resource_type_of(resource) else {
                tracing::debug!(
                    bundle_id = self.bundle_id,
                    index,
                    "Skipping entry whose resource has no resourceType"
                );
                continue;
            };
            return Some(BundleEntry {
                bundle_id: self.bundle_id,
                index,
                resource_type,
                resource,
            });
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.entries.size_hint().1)
    }
}

/// The unit of projection: a singleton resource or one bundle entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceInstance {
    /// Identifier of the raw document this instance came from.
    pub source_id: String,

    /// Resource type of `payload`.
    pub resource_type: String,

    /// Parent bundle, if the instance was unnested from one.
    pub bundle_id: Option<String>,

    /// Position inside the parent bundle's entry array.
    pub entry_index: Option<usize>,

    /// The resource itself.
    pub payload: Value,
}
