//! Per-document encryption.
//!
//! A document is split into envelope members, copied through in plaintext
//! so the store can index and replicate it, and a payload that is
//! JSON-serialized and sealed with the document id as AAD. Binding the id
//! means a ciphertext copied to another id no longer opens.

use crate::envelope::{decrypt_value, encrypt_value, EncryptedEnvelope, DATA_FIELD, NONCE_FIELD, TAG_FIELD};
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use docseal_types::{
    is_design_doc_id, Document, DocumentExt, ATTACHMENTS_FIELD, CONFLICTS_FIELD, DELETED_FIELD,
    ID_FIELD, REV_FIELD, TIMESTAMPS_FIELD,
};
use serde_json::Value;
use uuid::Uuid;

/// Members that always stay in plaintext.
const ENVELOPE_FIELDS: &[&str] = &[
    ID_FIELD,
    REV_FIELD,
    DELETED_FIELD,
    ATTACHMENTS_FIELD,
    CONFLICTS_FIELD,
    TIMESTAMPS_FIELD,
];

/// Arrays in which a document names extra members to leave unencrypted.
const IGNORE_LIST_FIELDS: &[&str] = &["cy_ignore", "__cy_ignore"];

/// Members design documents need visible to the store.
const DESIGN_DOC_FIELDS: &[&str] = &[
    "language",
    "views",
    "filters",
    "updates",
    "validate_doc_update",
    "lists",
    "shows",
    "rewrites",
    "options",
];

/// Knobs for splitting documents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DocumentOptions {
    /// Seal underscore-prefixed members instead of passing them through.
    pub handle_special_members: bool,
}

fn ignored_by_document(doc: &Document) -> Vec<String> {
    IGNORE_LIST_FIELDS
        .iter()
        .filter_map(|field| doc.get(*field))
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn stays_plaintext(name: &str, design_doc: bool, ignored: &[String], opts: &DocumentOptions) -> bool {
    ENVELOPE_FIELDS.contains(&name)
        || IGNORE_LIST_FIELDS.contains(&name)
        || ignored.iter().any(|f| f == name)
        || (design_doc && DESIGN_DOC_FIELDS.contains(&name))
        || (!opts.handle_special_members && name.starts_with('_'))
}

/// Applies `prefix` to `id` unless it is already there.
pub fn prefixed_id(id: &str, prefix: Option<&str>) -> String {
    match prefix {
        Some(p) if !id.starts_with(p) => format!("{p}{id}"),
        _ => id.to_string(),
    }
}

/// Encrypts `doc`, generating an id when it has none.
pub fn encrypt_document(
    key: &DerivedKey,
    doc: Document,
    prefix: Option<&str>,
    opts: &DocumentOptions,
) -> CryptoResult<Document> {
    let id = match doc.id() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    };
    let id = prefixed_id(&id, prefix);
    let ignored = ignored_by_document(&doc);
    let design_doc = is_design_doc_id(&id);

    let mut envelope_doc = Document::new();
    let mut payload = Document::new();
    for (name, value) in doc {
        if name == ID_FIELD {
            continue;
        }
        if stays_plaintext(&name, design_doc, &ignored, opts) {
            envelope_doc.insert(name, value);
        } else {
            payload.insert(name, value);
        }
    }

    let envelope = encrypt_value(key, &Value::Object(payload), Some(&id))?;
    envelope_doc.set_id(id);
    envelope.write_into(&mut envelope_doc);
    Ok(envelope_doc)
}

/// True when `doc` carries a well-formed encryption envelope.
pub fn is_encrypted(doc: &Document) -> bool {
    EncryptedEnvelope::from_document(doc).is_some()
}

/// Decrypts `doc`. Documents without a well-formed envelope are returned
/// unchanged; a well-formed envelope that fails to open is an error.
pub fn decrypt_document(key: &DerivedKey, doc: &Document) -> CryptoResult<Document> {
    let Some(envelope) = EncryptedEnvelope::from_document(doc) else {
        return Ok(doc.clone());
    };

    let payload = match decrypt_value(key, &envelope, doc.id())? {
        Value::Object(map) => map,
        other => {
            return Err(CryptoError::MalformedEnvelope(format!(
                "payload is not an object: {other}"
            )));
        }
    };

    let mut out: Document = doc
        .iter()
        .filter(|(name, _)| !matches!(name.as_str(), NONCE_FIELD | TAG_FIELD | DATA_FIELD))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    for (name, value) in payload {
        out.entry(name).or_insert(value);
    }
    Ok(out)
}
