//! Document sources.
//!
//! The store holding raw documents is an external collaborator. The engine
//! only needs to page through it, which is what [`DocumentSource`] expresses.

use async_trait::async_trait;

use crate::Result;
use crate::document::RawDocument;

/// A pageable, read-only collection of raw documents.
///
/// Implementations must be thread-safe (`Send + Sync`). Fetching is the only
/// suspension point of an extraction run.
///
/// # Example
///
/// ```ignore
/// use octofhir_extract::{DocumentSource, RawDocument, Result};
///
/// struct TableSource { pool: PgPool }
///
/// #[async_trait]
/// impl DocumentSource for TableSource {
///     async fn fetch(&self, offset: usize, limit: usize) -> Result<Vec<RawDocument>> {
///         // SELECT id, content FROM resources ORDER BY id OFFSET $1 LIMIT $2
///     }
/// }
/// ```
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch up to `limit` documents starting at `offset`.
    ///
    /// A page shorter than `limit` (including an empty one) ends the stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Source`](crate::Error::Source) for infrastructure failures.
    async fn fetch(&self, offset: usize, limit: usize) -> Result<Vec<RawDocument>>;
}

/// A source backed by a vector, mainly for tests and small batches.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    documents: Vec<RawDocument>,
}

impl InMemorySource {
    pub fn new(documents: Vec<RawDocument>) -> Self {
        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl FromIterator<RawDocument> for InMemorySource {
    fn from_iter<I: IntoIterator<Item = RawDocument>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[async_trait]
impl DocumentSource for InMemorySource {
    async fn fetch(&self, offset: usize, limit: usize) -> Result<Vec<RawDocument>> {
        Ok(self
            .documents
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_paging() {
        let source: InMemorySource = (0..5)
            .map(|i| RawDocument::new(format!("row-{i}"), "{}"))
            .collect();
        assert_eq!(source.len(), 5);

        let first = tokio_test::block_on(source.fetch(0, 2)).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id, "row-0");

        let last = tokio_test::block_on(source.fetch(4, 2)).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id, "row-4");

        assert!(tokio_test::block_on(source.fetch(10, 2)).unwrap().is_empty());
    }
}
