//! Password lifecycle: setup, unlock, lock, change and reset.
//!
//! ```text
//! NoSalt --setup--> Locked --unlock--> Unlocked --lock--> Locked
//! ```
//!
//! Setup persists the salt document (salt plus password check) and ten
//! reset-key slots but leaves the store locked. Rotation commits the new
//! salt document and slots together, then rewrites every document the old
//! key opens under the new one.

use crate::error::{VaultError, VaultResult};
use crate::reset_keys::{build_reset_slots, recover_data_key};
use crate::store::CryptoStore;
use docseal_crypto::{
    create_password_check, decrypt_document, derive_key, encrypt_document, verify_password_check, DerivedKey, EncryptedEnvelope, KdfParams, Salt, CHECK_FIELD,
};
use docseal_storage::{DocumentStore, IdRange, StorageError};
use docseal_types::{
    is_key_material_doc_id, Document, DocumentExt, DELETED_FIELD, ID_FIELD, LEGACY_SALT_DOC_ID,
    REV_FIELD, SALT_DOC_ID,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

const MIN_PASSWORD_LEN: usize = 3;
const SALT_FIELD: &str = "salt";

/// Where a scope stands in the password lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// No salt document exists; `setup` has never run.
    NoSalt,
    Locked,
    Unlocked,
}

/// Outcome of `change_password` and `reset_password`.
#[derive(Debug)]
pub struct PasswordChange {
    pub salt: Salt,
    /// New recovery passwords in slot order. Every earlier one is void.
    /// A slot the store refused to rewrite is removed and has no entry.
    pub reset_keys: Vec<String>,
    /// Ids left untouched because the old key could not open them.
    pub not_updated: Vec<String>,
}

fn validate_password(password: &str, what: &str) -> VaultResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(VaultError::BadArgument(format!(
            "{what} must have at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub(crate) fn parse_salt(salt: Option<&str>) -> VaultResult<Option<Salt>> {
    salt.map(|s| {
        Salt::parse(s).ok_or_else(|| VaultError::BadArgument("salt must be 32 hex characters".to_string()))
    })
    .transpose()
}

/// Runs PBKDF2 on the blocking pool.
pub(crate) async fn derive_key_async(
    password: &str,
    salt: Option<Salt>,
    params: KdfParams,
) -> VaultResult<(DerivedKey, Salt)> {
    let password = Zeroizing::new(password.to_string());
    let derived =
        tokio::task::spawn_blocking(move || derive_key(&password, salt.as_ref().map(Salt::as_str), &params))
            .await??;
    Ok(derived)
}

fn stored_salt(doc: &Document) -> VaultResult<Salt> {
    doc.get(SALT_FIELD)
        .and_then(Value::as_str)
        .and_then(Salt::parse)
        .ok_or_else(|| VaultError::BadArgument("stored salt is malformed".to_string()))
}

/// Verifies the password check of a salt document. `Ok(false)` when the
/// document predates password checks.
fn verify_stored_check(key: &DerivedKey, salt_doc: &Document) -> VaultResult<bool> {
    let Some(check) = salt_doc.get(CHECK_FIELD).and_then(EncryptedEnvelope::from_value) else {
        return Ok(false);
    };
    verify_password_check(key, &check).map_err(|err| {
        if err.is_authentication() {
            VaultError::Unauthorized("invalid password".to_string())
        } else {
            err.into()
        }
    })?;
    Ok(true)
}

fn salt_document(key: &DerivedKey, salt: &Salt, rev: Option<String>) -> VaultResult<Document> {
    let mut doc = Document::new();
    doc.set_id(SALT_DOC_ID);
    if let Some(rev) = rev {
        doc.set_rev(rev);
    }
    doc.insert(SALT_FIELD.to_string(), Value::String(salt.as_str().to_string()));
    doc.insert(CHECK_FIELD.to_string(), create_password_check(key)?.to_value());
    Ok(doc)
}

/// Bulk-writes `docs`, failing on the first rejected document.
async fn write_all(store: &dyn DocumentStore, docs: Vec<Document>) -> VaultResult<()> {
    for result in store.bulk_write(docs).await? {
        result?;
    }
    Ok(())
}

impl CryptoStore {
    fn ensure_persistent_scope(&self) -> VaultResult<()> {
        if self.registry.is_independent() {
            return Err(VaultError::BadArgument(
                "password scopes have no persisted salt".to_string(),
            ));
        }
        Ok(())
    }

    /// The salt document and whether it was found at the legacy id.
    async fn load_salt_doc(&self) -> VaultResult<Option<(Document, bool)>> {
        let store = &self.shared.store;
        match store.find(SALT_DOC_ID).await {
            Ok(doc) => return Ok(Some((doc, false))),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        match store.find(LEGACY_SALT_DOC_ID).await {
            Ok(doc) => Ok(Some((doc, true))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn ensure_no_remote_salt(&self) -> VaultResult<()> {
        let Some(remote) = &self.shared.remote else {
            return Ok(());
        };
        for id in [SALT_DOC_ID, LEGACY_SALT_DOC_ID] {
            match remote.find(id).await {
                Ok(_) => {
                    return Err(VaultError::Unauthorized(
                        "salt doc already exists on the remote".to_string(),
                    ));
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    warn!("Remote salt check failed, continuing setup: {}", err);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn migrate_legacy_salt(&self, legacy: Document) -> VaultResult<()> {
        let mut doc: Document = legacy
            .iter()
            .filter(|(name, _)| !matches!(name.as_str(), ID_FIELD | REV_FIELD | DELETED_FIELD))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        doc.set_id(SALT_DOC_ID);
        self.shared.store.add(doc).await?;
        self.shared.store.remove(legacy).await?;
        info!("Moved salt document from {} to {}", LEGACY_SALT_DOC_ID, SALT_DOC_ID);
        Ok(())
    }

    pub async fn status(&self) -> VaultResult<Status> {
        if self.registry.is_unlocked() {
            return Ok(Status::Unlocked);
        }
        if self.registry.is_independent() {
            return Ok(Status::Locked);
        }
        Ok(match self.load_salt_doc().await? {
            Some(_) => Status::Locked,
            None => Status::NoSalt,
        })
    }

    /// Creates the salt document and ten reset keys. The store stays
    /// locked; the returned recovery passwords are not stored anywhere.
    pub async fn setup(&self, password: &str, salt: Option<&str>) -> VaultResult<Vec<String>> {
        self.ensure_persistent_scope()?;
        validate_password(password, "password")?;
        let salt = parse_salt(salt)?;

        if self.load_salt_doc().await?.is_some() {
            return Err(VaultError::Unauthorized("salt doc already exists".to_string()));
        }
        self.ensure_no_remote_salt().await?;

        let (key, salt) = derive_key_async(password, salt, self.shared.kdf).await?;
        let key = Arc::new(key);
        let store = self.shared.store.as_ref();
        let (mut batch, reset_keys) = build_reset_slots(store, &key, self.shared.kdf).await?;
        batch.push(salt_document(&key, &salt, None)?);
        write_all(store, batch).await?;

        info!("Crypto store set up with {} reset keys", reset_keys.len());
        Ok(reset_keys)
    }

    pub async fn unlock(&self, password: &str) -> VaultResult<()> {
        self.ensure_persistent_scope()?;
        if password.is_empty() {
            return Err(VaultError::BadArgument("password must not be empty".to_string()));
        }
        if self.registry.is_unlocked() {
            return Err(VaultError::AlreadyUnlocked);
        }

        let (salt_doc, legacy) = self
            .load_salt_doc()
            .await?
            .ok_or_else(|| VaultError::MissingDocument(SALT_DOC_ID.to_string()))?;
        let salt = stored_salt(&salt_doc)?;
        let (key, salt) = derive_key_async(password, Some(salt), self.shared.kdf).await?;
        let has_check = verify_stored_check(&key, &salt_doc)?;

        if legacy {
            self.migrate_legacy_salt(salt_doc).await?;
        }

        self.registry.install(key, salt);
        if !has_check && !self.shared.config.no_password_check_auto_fix {
            self.registry.schedule_check_repair();
        }
        info!("Crypto store unlocked");
        Ok(())
    }

    /// Wipes the key. Returns false if the store was already locked.
    pub fn lock(&self) -> bool {
        let locked = self.registry.lock();
        if locked {
            info!("Crypto store locked");
        }
        locked
    }

    pub async fn change_password(&self, old_password: &str, new_password: &str) -> VaultResult<PasswordChange> {
        self.ensure_persistent_scope()?;
        if old_password.is_empty() {
            return Err(VaultError::BadArgument("old password must not be empty".to_string()));
        }
        validate_password(new_password, "new password")?;
        let current = self.registry.key()?;

        let salt_doc = self.shared.store.find(SALT_DOC_ID).await?;
        let salt = stored_salt(&salt_doc)?;
        let (old_key, _) = derive_key_async(old_password, Some(salt), self.shared.kdf).await?;
        if !verify_stored_check(&old_key, &salt_doc)? && !old_key.matches(&current) {
            return Err(VaultError::Unauthorized("invalid password".to_string()));
        }
        drop(current);

        self.rotate(old_key, new_password, Some(salt_doc)).await
    }

    /// Recovers the data key with a reset key and rotates to
    /// `new_password`. Works while locked and leaves the store unlocked.
    pub async fn reset_password(&self, reset_key: &str, new_password: &str) -> VaultResult<PasswordChange> {
        self.ensure_persistent_scope()?;
        if reset_key.is_empty() {
            return Err(VaultError::BadArgument("reset key must not be empty".to_string()));
        }
        validate_password(new_password, "new password")?;

        let old_key = recover_data_key(self.shared.store.as_ref(), reset_key, self.shared.kdf).await?;
        let salt_doc = match self.shared.store.find(SALT_DOC_ID).await {
            Ok(doc) => Some(doc),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };
        if let Some(doc) = &salt_doc {
            verify_stored_check(&old_key, doc).map_err(|err| {
                if err.is_unauthorized() {
                    VaultError::Unauthorized("reset key incorrect".to_string())
                } else {
                    err
                }
            })?;
        }
        self.rotate(old_key, new_password, salt_doc).await
    }

    /// Puts the pre-rotation key state back after a failed commit.
    fn restore(&self, old_key: DerivedKey, previous_salt: Option<Salt>) {
        match previous_salt {
            Some(salt) => self.registry.install(old_key, salt),
            None => {
                self.registry.lock();
            }
        }
    }

    /// Writes the salt document and the reset slots in one batch, salt
    /// first. Returns the indexes of slots that were not written.
    ///
    /// A slot left behind still wraps the previous key. It is removed, and
    /// `reset_password` refuses any key the salt document's check rejects.
    async fn commit_key_material(&self, batch: Vec<Document>) -> VaultResult<Vec<usize>> {
        let store = self.shared.store.as_ref();
        let ids: Vec<String> = batch
            .iter()
            .map(|doc| doc.id().unwrap_or_default().to_string())
            .collect();
        let mut results = store.bulk_write(batch).await?.into_iter();

        match results.next() {
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(err.into()),
            None => {
                return Err(VaultError::Storage(StorageError::Unavailable(
                    "store returned no result for the salt document".to_string(),
                )));
            }
        }

        let mut stale = Vec::new();
        for (index, (id, result)) in ids.iter().skip(1).zip(results).enumerate() {
            if let Err(err) = result {
                warn!("Reset key slot {} was not rotated: {}", id, err);
                self.discard_stale_slot(id).await;
                stale.push(index);
            }
        }
        Ok(stale)
    }

    async fn discard_stale_slot(&self, id: &str) {
        let store = self.shared.store.as_ref();
        let removed = match store.find(id).await {
            Ok(doc) => store.remove(doc).await.map(|_| ()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(err) = removed {
            warn!("Could not remove stale reset key slot {}: {}", id, err);
        }
    }

    async fn rotate(
        &self,
        mut old_key: DerivedKey,
        new_password: &str,
        salt_doc: Option<Document>,
    ) -> VaultResult<PasswordChange> {
        let _gate = self.shared.rotation.write().await;
        let store = self.shared.store.as_ref();
        let (new_key, new_salt) = derive_key_async(new_password, None, self.shared.kdf).await?;
        let opts = self.shared.config.document_options();

        // Plaintext documents decrypt to themselves and come out sealed.
        let mut not_updated = Vec::new();
        let mut ids = Vec::new();
        let mut resealed = Vec::new();
        for doc in store.find_all(&IdRange::all()).await? {
            let Some(id) = doc.id().map(str::to_string) else {
                continue;
            };
            if is_key_material_doc_id(&id) {
                continue;
            }
            let sealed = decrypt_document(&old_key, &doc)
                .and_then(|plain| encrypt_document(&new_key, plain, None, &opts));
            match sealed {
                Ok(sealed) => {
                    ids.push(id);
                    resealed.push(sealed);
                }
                Err(err) => {
                    warn!("Leaving {} under its current key: {}", id, err);
                    not_updated.push(id);
                }
            }
        }

        let new_key = Arc::new(new_key);
        let (slots, mut reset_keys) = build_reset_slots(store, &new_key, self.shared.kdf).await?;
        let rev = salt_doc.as_ref().and_then(|doc| doc.rev()).map(str::to_string);
        let mut key_material = Vec::with_capacity(slots.len() + 1);
        key_material.push(salt_document(&new_key, &new_salt, rev)?);
        key_material.extend(slots);

        // Install first: the store emits the rewrites synchronously and
        // listeners must decrypt them with the new key.
        let previous_salt = self.registry.salt();
        self.registry.install(Arc::clone(&new_key), new_salt.clone());

        let stale = match self.commit_key_material(key_material).await {
            Ok(stale) => stale,
            Err(err) => {
                self.restore(old_key, previous_salt);
                return Err(err);
            }
        };
        for index in stale.into_iter().rev() {
            reset_keys.remove(index);
        }

        if !resealed.is_empty() {
            match store.bulk_write(resealed).await {
                Ok(written) => {
                    for (id, result) in ids.into_iter().zip(written) {
                        if let Err(err) = result {
                            warn!("Failed to write re-encrypted {}: {}", id, err);
                            not_updated.push(id);
                        }
                    }
                }
                Err(err) => {
                    let previous = salt_doc.as_ref().and_then(|doc| doc.get(SALT_FIELD));
                    warn!("Re-encrypted documents not written (previous salt {:?}): {}", previous, err);
                    not_updated.extend(ids);
                }
            }
        }
        old_key.wipe();

        info!(
            "Password rotated; {} document(s) left under another key",
            not_updated.len()
        );
        Ok(PasswordChange {
            salt: new_salt,
            reset_keys,
            not_updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventName;
    use docseal_storage::MemoryStore;
    use serde_json::json;
    use std::sync::Mutex;

    const FAST: KdfParams = KdfParams { iterations: 1_000 };

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password("ab", "password").is_err());
        assert!(validate_password("abc", "password").is_ok());
        assert!(validate_password("äöü", "password").is_ok());
    }

    #[test]
    fn explicit_salt_must_be_well_formed() {
        assert!(parse_salt(None).unwrap().is_none());
        assert!(parse_salt(Some("00112233445566778899aabbccddeeff")).unwrap().is_some());
        assert!(matches!(parse_salt(Some("short")), Err(VaultError::BadArgument(_))));
    }

    #[tokio::test]
    async fn rotation_keeps_no_handle_on_the_retired_key() {
        let store = Arc::new(MemoryStore::new());
        let crypto = CryptoStore::builder(store).with_kdf_params(FAST).build();
        crypto.setup("first", None).await.unwrap();
        crypto.unlock("first").await.unwrap();
        crypto
            .add(json!({ "_id": "a", "v": 1 }).as_object().cloned().unwrap())
            .await
            .unwrap();

        let retired = Arc::downgrade(&crypto.registry.key().unwrap());
        let released: Arc<Mutex<Vec<bool>>> = Arc::default();
        let seen = Arc::clone(&released);
        crypto.on(EventName::Update, move |_| {
            seen.lock().unwrap().push(retired.upgrade().is_none());
        });

        crypto.change_password("first", "second").await.unwrap();
        assert_eq!(*released.lock().unwrap(), vec![true]);
    }
}
