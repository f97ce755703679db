//! In-memory document store.

use crate::error::{StorageError, StorageResult};
use crate::feed::{ChangeFeed, StoreChange};
use crate::revision::{resolve_write, WriteOp};
use crate::store::{DocumentStore, IdRange};
use async_trait::async_trait;
use docseal_types::{Document, DocumentExt};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Document store held entirely in memory. Tombstones are kept so
/// revision lineage survives delete/re-add.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, Document>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.rows().values().filter(|doc| !doc.is_deleted()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored row for `id`, tombstones included.
    pub fn raw(&self, id: &str) -> Option<Document> {
        self.rows().get(id).cloned()
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Document>> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, doc: Document, op: WriteOp) -> StorageResult<Document> {
        let change = {
            let mut rows = self.rows();
            let id = doc.id().unwrap_or_default().to_string();
            let (stored, kind) = resolve_write(rows.get(&id), doc, op)?;
            rows.insert(id, stored.clone());
            StoreChange { kind, doc: stored }
        };
        self.feed.emit(&change);
        Ok(change.doc)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, id: &str) -> StorageResult<Document> {
        self.rows()
            .get(id)
            .filter(|doc| !doc.is_deleted())
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn find_all(&self, range: &IdRange) -> StorageResult<Vec<Document>> {
        Ok(self
            .rows()
            .iter()
            .filter(|(id, doc)| range.contains(id) && !doc.is_deleted())
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn add(&self, doc: Document) -> StorageResult<Document> {
        self.write(doc, WriteOp::Add)
    }

    async fn update(&self, doc: Document) -> StorageResult<Document> {
        self.write(doc, WriteOp::Update)
    }

    async fn remove(&self, doc: Document) -> StorageResult<Document> {
        self.write(doc, WriteOp::Remove)
    }

    async fn bulk_write(&self, docs: Vec<Document>) -> StorageResult<Vec<StorageResult<Document>>> {
        Ok(docs
            .into_iter()
            .map(|doc| {
                let op = WriteOp::classify(&doc);
                self.write(doc, op)
            })
            .collect())
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }
}
