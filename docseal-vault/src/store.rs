//! The encrypted document API.
//!
//! A [`CryptoStore`] is one scope over a [`DocumentStore`]: the root, a
//! prefix view, or an independent password scope. Scopes are cheap handles;
//! the backing store, write locks and rotation gate are shared by every
//! scope derived from the same root.

use crate::config::CryptoConfig;
use crate::error::{VaultError, VaultResult};
use crate::events::{ChangeEvent, EventName, EventNode, ListenerId};
use crate::lifecycle::{derive_key_async, parse_salt};
use crate::lock::DocumentLocks;
use crate::registry::KeyRegistry;
use docseal_crypto::{
    create_password_check, decrypt_document, decrypt_value, encrypt_document, encrypt_value,
    is_encrypted, prefixed_id, DerivedKey, EncryptedEnvelope, KdfParams, Salt, CHECK_FIELD,
};
use docseal_storage::{DocumentStore, IdRange, StorageError};
use docseal_types::{
    is_design_doc_id, is_key_material_doc_id, Document, DocumentExt, Stamp, DELETED_FIELD,
    ID_FIELD, REV_FIELD, SALT_DOC_ID,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub(crate) struct Shared {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) remote: Option<Arc<dyn DocumentStore>>,
    pub(crate) config: CryptoConfig,
    pub(crate) kdf: KdfParams,
    pub(crate) locks: Arc<DocumentLocks>,
    /// Held for reading by every document read and write, and for writing
    /// by password rotation. No operation sees the new key before the
    /// documents it opens are written.
    pub(crate) rotation: RwLock<()>,
}

/// Builder for a root [`CryptoStore`].
pub struct CryptoStoreBuilder {
    store: Arc<dyn DocumentStore>,
    remote: Option<Arc<dyn DocumentStore>>,
    config: CryptoConfig,
    kdf: KdfParams,
}

impl CryptoStoreBuilder {
    /// Remote consulted by `setup` before creating a new salt.
    pub fn with_remote(mut self, remote: Arc<dyn DocumentStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_config(mut self, config: CryptoConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn build(self) -> CryptoStore {
        let registry = KeyRegistry::root();
        let events = EventNode::root(Arc::clone(&self.store), Arc::clone(&registry));
        CryptoStore {
            shared: Arc::new(Shared {
                store: self.store,
                remote: self.remote,
                config: self.config,
                kdf: self.kdf,
                locks: DocumentLocks::new(),
                rotation: RwLock::new(()),
            }),
            registry,
            events,
            prefix: None,
        }
    }
}

#[derive(Clone)]
pub struct CryptoStore {
    pub(crate) shared: Arc<Shared>,
    pub(crate) registry: Arc<KeyRegistry>,
    events: Arc<EventNode>,
    prefix: Option<String>,
}

impl CryptoStore {
    pub fn new(store: Arc<dyn DocumentStore>, config: CryptoConfig) -> Self {
        Self::builder(store).with_config(config).build()
    }

    pub fn builder(store: Arc<dyn DocumentStore>) -> CryptoStoreBuilder {
        CryptoStoreBuilder {
            store,
            remote: None,
            config: CryptoConfig::default(),
            kdf: KdfParams::default(),
        }
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    /// A view whose ids live under `prefix`, sharing this scope's key.
    pub fn with_id_prefix(&self, prefix: &str) -> CryptoStore {
        let full = prefixed_id(prefix, self.prefix.as_deref());
        CryptoStore {
            shared: Arc::clone(&self.shared),
            registry: KeyRegistry::child(&self.registry),
            events: EventNode::prefixed(&self.events, full.clone()),
            prefix: Some(full),
        }
    }

    /// An independent scope keyed by `password`. Nothing is persisted for
    /// it; callers keep the returned salt to reopen the scope later.
    pub async fn with_password(
        &self,
        password: &str,
        salt: Option<&str>,
    ) -> VaultResult<(CryptoStore, Salt)> {
        if password.is_empty() {
            return Err(VaultError::BadArgument("password must not be empty".to_string()));
        }
        let salt = parse_salt(salt)?;
        let (key, salt) = derive_key_async(password, salt, self.shared.kdf).await?;
        let registry = KeyRegistry::independent(key, salt.clone());
        let events = EventNode::password(
            Arc::clone(&self.shared.store),
            Arc::clone(&registry),
            self.prefix.clone(),
        );
        let scope = CryptoStore {
            shared: Arc::clone(&self.shared),
            registry,
            events,
            prefix: self.prefix.clone(),
        };
        Ok((scope, salt))
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn config(&self) -> &CryptoConfig {
        &self.shared.config
    }

    pub fn is_unlocked(&self) -> bool {
        self.registry.is_unlocked()
    }

    /// Write locks shared by every scope of this store.
    pub fn locks(&self) -> &Arc<DocumentLocks> {
        &self.shared.locks
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn on<F>(&self, name: EventName, handler: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.events.on(name, handler)
    }

    pub fn one<F>(&self, name: EventName, handler: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.events.one(name, handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.events.off(id)
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Seals an arbitrary JSON value.
    pub fn encrypt(&self, value: &Value, aad: Option<&str>) -> VaultResult<EncryptedEnvelope> {
        let key = self.registry.key()?;
        Ok(encrypt_value(&key, value, aad)?)
    }

    pub async fn decrypt(&self, envelope: &EncryptedEnvelope, aad: Option<&str>) -> VaultResult<Value> {
        let _gate = self.shared.rotation.read().await;
        let key = self.registry.key()?;
        let value = decrypt_value(&key, envelope, aad)?;
        self.repair_password_check(&key).await;
        Ok(value)
    }

    // ========================================================================
    // Documents
    // ========================================================================

    pub async fn add(&self, doc: Document) -> VaultResult<Document> {
        let _gate = self.shared.rotation.read().await;
        let key = self.registry.key()?;
        let sealed = self.prepare_add(&key, doc)?;
        let stored = self.shared.store.add(sealed).await?;
        Ok(decrypt_document(&key, &stored)?)
    }

    /// Adds every document; one result per input, in order.
    pub async fn add_many(&self, docs: Vec<Document>) -> VaultResult<Vec<VaultResult<Document>>> {
        let _gate = self.shared.rotation.read().await;
        let key = self.registry.key()?;
        let prepared = docs.into_iter().map(|doc| self.prepare_add(&key, doc)).collect();
        self.write_batch(&key, prepared).await
    }

    pub async fn find(&self, id: &str) -> VaultResult<Document> {
        let _gate = self.shared.rotation.read().await;
        let key = self.registry.key()?;
        let raw = self.shared.store.find(&self.full_id(id)).await?;
        self.open(&key, &raw).await
    }

    pub async fn find_many<S: AsRef<str>>(&self, ids: &[S]) -> VaultResult<Vec<VaultResult<Document>>> {
        let _gate = self.shared.rotation.read().await;
        let key = self.registry.key()?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let found = match self.shared.store.find(&self.full_id(id.as_ref())).await {
                Ok(raw) => self.open(&key, &raw).await,
                Err(err) => Err(err.into()),
            };
            results.push(found);
        }
        Ok(results)
    }

    /// Every user document in scope. Documents sealed under another key
    /// are skipped.
    pub async fn find_all(&self) -> VaultResult<Vec<Document>> {
        let _gate = self.shared.rotation.read().await;
        let key = self.registry.key()?;
        let range = match &self.prefix {
            Some(prefix) => IdRange::prefix(prefix),
            None => IdRange::all(),
        };

        let mut docs = Vec::new();
        let mut opened_any = false;
        for raw in self.shared.store.find_all(&range).await? {
            let id = raw.id().unwrap_or_default();
            if is_key_material_doc_id(id) || is_design_doc_id(id) {
                continue;
            }
            if !is_encrypted(&raw) {
                docs.push(raw);
                continue;
            }
            match decrypt_document(&key, &raw) {
                Ok(doc) => {
                    opened_any = true;
                    docs.push(doc);
                }
                Err(err) => warn!("Skipping {} in find_all: {}", id, err),
            }
        }
        if opened_any {
            self.repair_password_check(&key).await;
        }
        Ok(docs)
    }

    /// Merges `changes` into the stored document.
    pub async fn update(&self, id: &str, changes: Document) -> VaultResult<Document> {
        let _gate = self.shared.rotation.read().await;
        let key = self.registry.key()?;
        let _guard = self.shared.locks.acquire(self.prefix(), id)?;
        let sealed = self.prepare_update(&key, id, changes).await?;
        let stored = self.shared.store.update(sealed).await?;
        Ok(decrypt_document(&key, &stored)?)
    }

    /// Updates many documents, each identified by its own `_id`.
    pub async fn update_many(&self, docs: Vec<Document>) -> VaultResult<Vec<VaultResult<Document>>> {
        let _gate = self.shared.rotation.read().await;
        let key = self.registry.key()?;
        let ids: Vec<String> = docs
            .iter()
            .map(|doc| doc.id().unwrap_or_default().to_string())
            .collect();
        let (_guard, failures) = self.shared.locks.acquire_many(self.prefix(), ids.as_slice());

        let mut prepared = Vec::with_capacity(docs.len());
        for ((doc, id), failure) in docs.into_iter().zip(&ids).zip(failures) {
            prepared.push(match failure {
                Some(err) => Err(err),
                None => self.prepare_update(&key, id, doc).await,
            });
        }
        self.write_batch(&key, prepared).await
    }

    /// Deletes a document, returning its last decrypted state.
    pub async fn remove(&self, id: &str) -> VaultResult<Document> {
        let _gate = self.shared.rotation.read().await;
        let key = self.registry.key()?;
        let _guard = self.shared.locks.acquire(self.prefix(), id)?;
        let sealed = self.prepare_remove(&key, id).await?;
        let stored = self.shared.store.remove(sealed).await?;
        Ok(decrypt_document(&key, &stored)?)
    }

    pub async fn remove_many<S: AsRef<str>>(&self, ids: &[S]) -> VaultResult<Vec<VaultResult<Document>>> {
        let _gate = self.shared.rotation.read().await;
        let key = self.registry.key()?;
        let (_guard, failures) = self.shared.locks.acquire_many(self.prefix(), ids);

        let mut prepared = Vec::with_capacity(ids.len());
        for (id, failure) in ids.iter().zip(failures) {
            prepared.push(match failure {
                Some(err) => Err(err),
                None => self.prepare_remove(&key, id.as_ref()).await,
            });
        }
        self.write_batch(&key, prepared).await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn full_id(&self, id: &str) -> String {
        prefixed_id(id, self.prefix())
    }

    fn seal(&self, key: &DerivedKey, doc: Document) -> VaultResult<Document> {
        let opts = self.shared.config.document_options();
        Ok(encrypt_document(key, doc, self.prefix(), &opts)?)
    }

    /// Decrypts a stored document, scheduling the password-check repair
    /// after the first ciphertext that opens.
    async fn open(&self, key: &DerivedKey, raw: &Document) -> VaultResult<Document> {
        let doc = decrypt_document(key, raw)?;
        if is_encrypted(raw) {
            self.repair_password_check(key).await;
        }
        Ok(doc)
    }

    fn prepare_add(&self, key: &DerivedKey, mut doc: Document) -> VaultResult<Document> {
        doc.remove(REV_FIELD);
        doc.remove(DELETED_FIELD);
        doc.stamp(Stamp::Created);
        let sealed = self.seal(key, doc)?;
        match sealed.id() {
            Some(id) if is_key_material_doc_id(id) => Err(VaultError::BadArgument(format!(
                "{id} is reserved for key material"
            ))),
            _ => Ok(sealed),
        }
    }

    async fn prepare_update(&self, key: &DerivedKey, id: &str, changes: Document) -> VaultResult<Document> {
        let raw = self.shared.store.find(&self.full_id(id)).await?;
        let mut current = self.open(key, &raw).await?;
        for (name, value) in changes {
            if name != ID_FIELD && name != REV_FIELD {
                current.insert(name, value);
            }
        }
        current.stamp(Stamp::Updated);
        self.seal(key, current)
    }

    async fn prepare_remove(&self, key: &DerivedKey, id: &str) -> VaultResult<Document> {
        let raw = self.shared.store.find(&self.full_id(id)).await?;
        let mut current = self.open(key, &raw).await?;
        current.stamp(Stamp::Deleted);
        current.insert(DELETED_FIELD.to_string(), Value::Bool(true));
        self.seal(key, current)
    }

    /// Writes the prepared documents in one bulk call, keeping failed
    /// preparations in their slots.
    async fn write_batch(
        &self,
        key: &DerivedKey,
        prepared: Vec<VaultResult<Document>>,
    ) -> VaultResult<Vec<VaultResult<Document>>> {
        let mut results: Vec<Option<VaultResult<Document>>> = Vec::with_capacity(prepared.len());
        let mut positions = Vec::new();
        let mut batch = Vec::new();
        for (index, item) in prepared.into_iter().enumerate() {
            match item {
                Ok(doc) => {
                    positions.push(index);
                    batch.push(doc);
                    results.push(None);
                }
                Err(err) => results.push(Some(Err(err))),
            }
        }

        if !batch.is_empty() {
            let written = self.shared.store.bulk_write(batch).await?;
            for (index, result) in positions.into_iter().zip(written) {
                results[index] = Some(match result {
                    Ok(stored) => decrypt_document(key, &stored).map_err(VaultError::from),
                    Err(err) => Err(err.into()),
                });
            }
        }

        Ok(results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(VaultError::Storage(StorageError::Unavailable(
                        "store returned no result for document".to_string(),
                    )))
                })
            })
            .collect())
    }

    async fn repair_password_check(&self, key: &DerivedKey) {
        if self.registry.is_independent() || !self.registry.take_check_repair() {
            return;
        }
        match self.write_password_check(key).await {
            Ok(()) => info!("Added missing password check to salt document"),
            Err(err) => warn!("Could not add password check: {}", err),
        }
    }

    async fn write_password_check(&self, key: &DerivedKey) -> VaultResult<()> {
        let mut salt_doc = self.shared.store.find(SALT_DOC_ID).await?;
        let check = create_password_check(key)?;
        salt_doc.insert(CHECK_FIELD.to_string(), check.to_value());
        self.shared.store.update(salt_doc).await?;
        Ok(())
    }
}
