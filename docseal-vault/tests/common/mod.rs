#![allow(dead_code)]

use async_trait::async_trait;
use docseal_crypto::KdfParams;
use docseal_storage::{
    ChangeFeed, DocumentStore, IdRange, MemoryStore, StorageError, StorageResult,
};
use docseal_types::{is_reset_doc_id, Document, DocumentExt};
use docseal_vault::{CryptoConfig, CryptoStore};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const FAST: KdfParams = KdfParams { iterations: 1_000 };

pub fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

pub fn fast_store() -> (Arc<MemoryStore>, CryptoStore) {
    fast_store_with(CryptoConfig::default())
}

pub fn fast_store_with(config: CryptoConfig) -> (Arc<MemoryStore>, CryptoStore) {
    let store = Arc::new(MemoryStore::new());
    let crypto = CryptoStore::builder(store.clone())
        .with_config(config)
        .with_kdf_params(FAST)
        .build();
    (store, crypto)
}

/// Set up and unlocked with `password`.
pub async fn unlocked_store(password: &str) -> (Arc<MemoryStore>, CryptoStore, Vec<String>) {
    let (store, crypto) = fast_store();
    let reset_keys = crypto.setup(password, None).await.unwrap();
    crypto.unlock(password).await.unwrap();
    (store, crypto, reset_keys)
}

/// Like [`unlocked_store`] over any backend.
pub async fn unlocked_over<S: DocumentStore + 'static>(
    store: Arc<S>,
    password: &str,
) -> (CryptoStore, Vec<String>) {
    let crypto = CryptoStore::builder(store).with_kdf_params(FAST).build();
    let reset_keys = crypto.setup(password, None).await.unwrap();
    crypto.unlock(password).await.unwrap();
    (crypto, reset_keys)
}

/// A remote that cannot be reached.
#[derive(Default)]
pub struct UnreachableStore {
    feed: ChangeFeed,
}

fn refused<T>() -> StorageResult<T> {
    Err(StorageError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl DocumentStore for UnreachableStore {
    async fn find(&self, _id: &str) -> StorageResult<Document> {
        refused()
    }

    async fn find_all(&self, _range: &IdRange) -> StorageResult<Vec<Document>> {
        refused()
    }

    async fn add(&self, _doc: Document) -> StorageResult<Document> {
        refused()
    }

    async fn update(&self, _doc: Document) -> StorageResult<Document> {
        refused()
    }

    async fn remove(&self, _doc: Document) -> StorageResult<Document> {
        refused()
    }

    async fn bulk_write(&self, _docs: Vec<Document>) -> StorageResult<Vec<StorageResult<Document>>> {
        refused()
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }
}

/// A memory store whose reads yield to the scheduler, so concurrent
/// mutations actually interleave.
#[derive(Default)]
pub struct YieldingStore {
    inner: MemoryStore,
}

#[async_trait]
impl DocumentStore for YieldingStore {
    async fn find(&self, id: &str) -> StorageResult<Document> {
        tokio::task::yield_now().await;
        self.inner.find(id).await
    }

    async fn find_all(&self, range: &IdRange) -> StorageResult<Vec<Document>> {
        self.inner.find_all(range).await
    }

    async fn add(&self, doc: Document) -> StorageResult<Document> {
        self.inner.add(doc).await
    }

    async fn update(&self, doc: Document) -> StorageResult<Document> {
        self.inner.update(doc).await
    }

    async fn remove(&self, doc: Document) -> StorageResult<Document> {
        self.inner.remove(doc).await
    }

    async fn bulk_write(&self, docs: Vec<Document>) -> StorageResult<Vec<StorageResult<Document>>> {
        self.inner.bulk_write(docs).await
    }

    fn changes(&self) -> &ChangeFeed {
        self.inner.changes()
    }
}

/// How [`SlotRejectingStore`] treats reset-key slot writes once armed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotRejection {
    Off = 0,
    /// Any bulk write containing a slot fails as a whole.
    WholeBatch = 1,
    /// Slot documents fail individually.
    PerDocument = 2,
    /// Slot documents fail individually and cannot be removed either.
    PerDocumentSticky = 3,
}

/// A memory store that refuses reset-key slot writes on demand.
#[derive(Default)]
pub struct SlotRejectingStore {
    pub inner: MemoryStore,
    mode: AtomicU8,
}

impl SlotRejectingStore {
    pub fn reject(&self, mode: SlotRejection) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    fn rejecting(&self, mode: SlotRejection) -> bool {
        self.mode.load(Ordering::SeqCst) == mode as u8
    }
}

fn is_slot(doc: &Document) -> bool {
    doc.id().is_some_and(is_reset_doc_id)
}

fn slot_refused<T>(doc: &Document) -> StorageResult<T> {
    Err(StorageError::Unavailable(format!(
        "write to {} refused",
        doc.id().unwrap_or_default()
    )))
}

#[async_trait]
impl DocumentStore for SlotRejectingStore {
    async fn find(&self, id: &str) -> StorageResult<Document> {
        self.inner.find(id).await
    }

    async fn find_all(&self, range: &IdRange) -> StorageResult<Vec<Document>> {
        self.inner.find_all(range).await
    }

    async fn add(&self, doc: Document) -> StorageResult<Document> {
        self.inner.add(doc).await
    }

    async fn update(&self, doc: Document) -> StorageResult<Document> {
        self.inner.update(doc).await
    }

    async fn remove(&self, doc: Document) -> StorageResult<Document> {
        if is_slot(&doc) && self.rejecting(SlotRejection::PerDocumentSticky) {
            return slot_refused(&doc);
        }
        self.inner.remove(doc).await
    }

    async fn bulk_write(&self, docs: Vec<Document>) -> StorageResult<Vec<StorageResult<Document>>> {
        if self.rejecting(SlotRejection::WholeBatch) && docs.iter().any(is_slot) {
            return Err(StorageError::Unavailable("slot batch refused".to_string()));
        }
        if !self.rejecting(SlotRejection::PerDocument)
            && !self.rejecting(SlotRejection::PerDocumentSticky)
        {
            return self.inner.bulk_write(docs).await;
        }
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            if is_slot(&doc) {
                results.push(slot_refused(&doc));
            } else {
                results.extend(self.inner.bulk_write(vec![doc]).await?);
            }
        }
        Ok(results)
    }

    fn changes(&self) -> &ChangeFeed {
        self.inner.changes()
    }
}

/// A memory store whose bulk writes stall once armed, announcing each
/// stall on `stalled`.
#[derive(Default)]
pub struct StallingStore {
    pub inner: MemoryStore,
    pub stalled: Notify,
    armed: AtomicBool,
}

impl StallingStore {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for StallingStore {
    async fn find(&self, id: &str) -> StorageResult<Document> {
        self.inner.find(id).await
    }

    async fn find_all(&self, range: &IdRange) -> StorageResult<Vec<Document>> {
        self.inner.find_all(range).await
    }

    async fn add(&self, doc: Document) -> StorageResult<Document> {
        self.inner.add(doc).await
    }

    async fn update(&self, doc: Document) -> StorageResult<Document> {
        self.inner.update(doc).await
    }

    async fn remove(&self, doc: Document) -> StorageResult<Document> {
        self.inner.remove(doc).await
    }

    async fn bulk_write(&self, docs: Vec<Document>) -> StorageResult<Vec<StorageResult<Document>>> {
        if self.armed.load(Ordering::SeqCst) {
            self.stalled.notify_waiters();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.inner.bulk_write(docs).await
    }

    fn changes(&self) -> &ChangeFeed {
        self.inner.changes()
    }
}
