//! Forgotten-password recovery via one-time reset keys.
//!
//! Each reset-key slot wraps the current data key under a key derived from
//! its own random recovery password and its own salt. The recovery password
//! is handed to the user once and never stored; the slot document keeps
//! only the wrapping salt and the sealed `{ "key": <hex data key> }`.

use crate::envelope::{decrypt_value, encrypt_value, EncryptedEnvelope};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, derive_key_with_salt, DerivedKey, KdfParams, Salt};
use docseal_types::{reset_doc_id, Document, DocumentExt};
use rand::RngCore;
use serde_json::{json, Value};
use zeroize::Zeroizing;

/// Member holding the wrapping salt of a slot.
pub const RESET_SALT_FIELD: &str = "salt";

const RESET_KEY_BYTES: usize = 16;

/// Generates a recovery password (32 hex chars).
pub fn generate_reset_key() -> String {
    let mut bytes = [0u8; RESET_KEY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Builds slot `index`: wraps `data_key` under a key derived from
/// `reset_key` and a fresh salt. The result has no `_rev`; callers that
/// update an existing slot carry the old revision over.
pub fn create_reset_doc(
    index: usize,
    data_key: &DerivedKey,
    reset_key: &str,
    params: &KdfParams,
) -> CryptoResult<Document> {
    let id = reset_doc_id(index);
    let (wrapping_key, salt) = derive_key(reset_key, None, params)?;
    let hex_key = data_key.to_hex();
    let payload = json!({ "key": hex_key.as_str() });
    let envelope = encrypt_value(&wrapping_key, &payload, Some(&id))?;

    let mut doc = Document::new();
    doc.set_id(id);
    doc.insert(RESET_SALT_FIELD.to_string(), Value::String(salt.as_str().to_string()));
    envelope.write_into(&mut doc);
    Ok(doc)
}

/// Tries `candidate` against one slot, returning the wrapped data key.
///
/// A wrong candidate yields [`CryptoError::Authentication`].
pub fn open_reset_doc(doc: &Document, candidate: &str, params: &KdfParams) -> CryptoResult<DerivedKey> {
    let salt = doc
        .get(RESET_SALT_FIELD)
        .and_then(Value::as_str)
        .and_then(Salt::parse)
        .ok_or_else(|| CryptoError::MalformedEnvelope("reset key slot has no valid salt".to_string()))?;
    let envelope = EncryptedEnvelope::from_document(doc)
        .ok_or_else(|| CryptoError::MalformedEnvelope("reset key slot is not sealed".to_string()))?;

    let wrapping_key = derive_key_with_salt(candidate, &salt, params)?;
    let payload = decrypt_value(&wrapping_key, &envelope, doc.id())?;
    let hex_key = payload
        .get("key")
        .and_then(Value::as_str)
        .map(|s| Zeroizing::new(s.to_string()))
        .ok_or_else(|| CryptoError::MalformedEnvelope("reset key slot holds no key".to_string()))?;
    DerivedKey::from_hex(&hex_key)
}
