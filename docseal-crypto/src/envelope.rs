//! Hex-encoded encryption envelope: `{ nonce, tag, data }`.
//!
//! This is the persisted shape of every sealed payload, whether it is a
//! document body, a password check or a reset-key slot.

use crate::cipher::{self, NONCE_SIZE, TAG_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use docseal_types::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const NONCE_FIELD: &str = "nonce";
pub const TAG_FIELD: &str = "tag";
pub const DATA_FIELD: &str = "data";

/// Sealed payload with hex-encoded members.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// 24 hex chars (12 bytes).
    pub nonce: String,
    /// 32 hex chars (16 bytes).
    pub tag: String,
    /// Hex ciphertext.
    pub data: String,
}

impl EncryptedEnvelope {
    /// Seals raw bytes under a fresh nonce.
    pub fn seal_bytes(key: &DerivedKey, plaintext: &[u8], aad: Option<&str>) -> CryptoResult<Self> {
        let nonce = cipher::generate_nonce();
        let sealed = cipher::seal(key.as_bytes(), &nonce, plaintext, aad.map(str::as_bytes))?;
        Ok(Self {
            nonce: hex::encode(nonce),
            tag: hex::encode(sealed.tag),
            data: hex::encode(sealed.ciphertext),
        })
    }

    /// Opens the envelope. Undecodable hex is reported as malformed, a tag
    /// mismatch as [`CryptoError::Authentication`].
    pub fn open_bytes(&self, key: &DerivedKey, aad: Option<&str>) -> CryptoResult<Vec<u8>> {
        let nonce = decode_field(NONCE_FIELD, &self.nonce)?;
        let tag = decode_field(TAG_FIELD, &self.tag)?;
        let data = decode_field(DATA_FIELD, &self.data)?;
        cipher::open(key.as_bytes(), &nonce, &data, &tag, aad.map(str::as_bytes))
    }

    /// Reads the envelope members out of a document, if it carries a
    /// well-formed set of them. Anything else is a plaintext document.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let nonce = doc.get(NONCE_FIELD)?.as_str()?;
        let tag = doc.get(TAG_FIELD)?.as_str()?;
        let data = doc.get(DATA_FIELD)?.as_str()?;
        if tag.len() != TAG_SIZE * 2 || nonce.is_empty() {
            return None;
        }
        Some(Self {
            nonce: nonce.to_string(),
            tag: tag.to_string(),
            data: data.to_string(),
        })
    }

    /// Parses an envelope passed around as a JSON value.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_object().and_then(Self::from_document)
    }

    /// Writes the envelope members into `doc`.
    pub fn write_into(self, doc: &mut Document) {
        doc.insert(NONCE_FIELD.to_string(), Value::String(self.nonce));
        doc.insert(TAG_FIELD.to_string(), Value::String(self.tag));
        doc.insert(DATA_FIELD.to_string(), Value::String(self.data));
    }

    pub fn to_value(&self) -> Value {
        let mut doc = Document::new();
        self.clone().write_into(&mut doc);
        Value::Object(doc)
    }
}

fn decode_field(field: &'static str, encoded: &str) -> CryptoResult<Vec<u8>> {
    let bytes = hex::decode(encoded)
        .map_err(|e| CryptoError::MalformedEnvelope(format!("{field} is not hex: {e}")))?;
    match field {
        NONCE_FIELD if bytes.len() != NONCE_SIZE => Err(CryptoError::InvalidLength {
            field,
            expected: NONCE_SIZE,
            actual: bytes.len(),
        }),
        _ => Ok(bytes),
    }
}

/// JSON-serializes `value` and seals it.
pub fn encrypt_value(key: &DerivedKey, value: &Value, aad: Option<&str>) -> CryptoResult<EncryptedEnvelope> {
    let plaintext = serde_json::to_vec(value)?;
    EncryptedEnvelope::seal_bytes(key, &plaintext, aad)
}

/// Opens an envelope produced by [`encrypt_value`].
pub fn decrypt_value(key: &DerivedKey, envelope: &EncryptedEnvelope, aad: Option<&str>) -> CryptoResult<Value> {
    let plaintext = envelope.open_bytes(key, aad)?;
    Ok(serde_json::from_slice(&plaintext)?)
}
