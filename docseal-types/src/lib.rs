//! Shared document model for docseal.
//!
//! Documents are CouchDB-style JSON objects. A handful of members form the
//! plaintext envelope the store needs to do its job (`_id`, `_rev`,
//! `_deleted` and the `hoodie` timestamp object); everything else belongs to
//! the application and is what gets sealed.
//!
//! The well-known ids below are part of the persisted format and must not
//! change: existing stores locate their salt and reset keys through them.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// A store document: a JSON object keyed by member name.
pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";
pub const REV_FIELD: &str = "_rev";
pub const DELETED_FIELD: &str = "_deleted";
pub const ATTACHMENTS_FIELD: &str = "_attachments";
pub const CONFLICTS_FIELD: &str = "_conflicts";
/// Timestamp object (`createdAt`, `updatedAt`, `deletedAt`).
pub const TIMESTAMPS_FIELD: &str = "hoodie";

/// Salt document of the root password scope.
pub const SALT_DOC_ID: &str = "hoodiePluginCryptoStore/salt";
/// Where older releases kept the salt. Migrated on unlock.
pub const LEGACY_SALT_DOC_ID: &str = "_design/cryptoStore/salt";
/// Id prefix shared by all reset-key slots.
pub const RESET_DOC_PREFIX: &str = "hoodiePluginCryptoStore/pwReset_";
/// Number of reset-key slots generated per rotation.
pub const RESET_KEY_COUNT: usize = 10;
/// Reserved namespace for design documents.
pub const DESIGN_DOC_PREFIX: &str = "_design/";

/// Id of reset-key slot `index`.
pub fn reset_doc_id(index: usize) -> String {
    format!("{RESET_DOC_PREFIX}{index}")
}

pub fn is_reset_doc_id(id: &str) -> bool {
    id.strip_prefix(RESET_DOC_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

pub fn is_design_doc_id(id: &str) -> bool {
    id.starts_with(DESIGN_DOC_PREFIX)
}

/// Documents that hold key material rather than user data.
pub fn is_key_material_doc_id(id: &str) -> bool {
    id == SALT_DOC_ID || id == LEGACY_SALT_DOC_ID || is_reset_doc_id(id)
}

/// Which lifecycle timestamp to stamp on a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stamp {
    Created,
    Updated,
    Deleted,
}

impl Stamp {
    fn field(self) -> &'static str {
        match self {
            Stamp::Created => "createdAt",
            Stamp::Updated => "updatedAt",
            Stamp::Deleted => "deletedAt",
        }
    }
}

/// Accessors for the envelope members every document carries.
pub trait DocumentExt {
    fn id(&self) -> Option<&str>;
    fn rev(&self) -> Option<&str>;
    fn is_deleted(&self) -> bool;
    fn set_id(&mut self, id: impl Into<String>);
    fn set_rev(&mut self, rev: impl Into<String>);
    /// Records the current time under `hoodie.<stamp>`.
    fn stamp(&mut self, stamp: Stamp);
}

impl DocumentExt for Document {
    fn id(&self) -> Option<&str> {
        self.get(ID_FIELD).and_then(Value::as_str)
    }

    fn rev(&self) -> Option<&str> {
        self.get(REV_FIELD).and_then(Value::as_str)
    }

    fn is_deleted(&self) -> bool {
        self.get(DELETED_FIELD).and_then(Value::as_bool).unwrap_or(false)
    }

    fn set_id(&mut self, id: impl Into<String>) {
        self.insert(ID_FIELD.to_string(), Value::String(id.into()));
    }

    fn set_rev(&mut self, rev: impl Into<String>) {
        self.insert(REV_FIELD.to_string(), Value::String(rev.into()));
    }

    fn stamp(&mut self, stamp: Stamp) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let entry = self
            .entry(TIMESTAMPS_FIELD.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(times) = entry {
            times.insert(stamp.field().to_string(), Value::String(now));
        }
    }
}

/// Builds a document from a JSON value, rejecting non-objects.
pub fn document_from_value(value: Value) -> Option<Document> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
