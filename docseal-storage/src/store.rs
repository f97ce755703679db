//! The document store seam.

use crate::error::StorageResult;
use crate::feed::ChangeFeed;
use async_trait::async_trait;
use docseal_types::Document;

/// Id range for [`DocumentStore::find_all`]: `start <= id < end`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl IdRange {
    /// Every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Every id beginning with `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        if prefix.is_empty() {
            return Self::all();
        }
        Self {
            start: Some(prefix.to_string()),
            end: Some(format!("{prefix}\u{fff0}")),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.start.as_deref().is_none_or(|start| id >= start)
            && self.end.as_deref().is_none_or(|end| id < end)
    }
}

/// A revisioned document store with change notifications.
///
/// `find` and `find_all` never return tombstones. Written documents come
/// back with their new `_rev`. Every successful write is emitted on
/// [`DocumentStore::changes`] before the call returns.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, id: &str) -> StorageResult<Document>;

    /// Live documents in `range`, ordered by id.
    async fn find_all(&self, range: &IdRange) -> StorageResult<Vec<Document>>;

    /// Creates a document. Fails with a conflict if a live one exists.
    async fn add(&self, doc: Document) -> StorageResult<Document>;

    /// Replaces a document; `_rev` must match the stored revision.
    async fn update(&self, doc: Document) -> StorageResult<Document>;

    /// Writes a tombstone; `_rev` must match the stored revision.
    async fn remove(&self, doc: Document) -> StorageResult<Document>;

    /// Writes many documents, one result per input. A document with
    /// `_deleted: true` is removed, one with a `_rev` updated, any other
    /// added.
    async fn bulk_write(&self, docs: Vec<Document>) -> StorageResult<Vec<StorageResult<Document>>>;

    fn changes(&self) -> &ChangeFeed;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_range_bounds() {
        let range = IdRange::prefix("team/");
        assert!(range.contains("team/"));
        assert!(range.contains("team/a"));
        assert!(!range.contains("team"));
        assert!(!range.contains("teams/a"));
        assert!(!range.contains("other/a"));
    }

    #[test]
    fn empty_prefix_is_everything() {
        assert_eq!(IdRange::prefix(""), IdRange::all());
        assert!(IdRange::all().contains("anything"));
    }
}
