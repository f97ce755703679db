//! Revision bookkeeping shared by the backends.

use crate::error::{StorageError, StorageResult};
use crate::feed::ChangeKind;
use docseal_types::{Document, DocumentExt, DELETED_FIELD, REV_FIELD};
use serde_json::Value;
use uuid::Uuid;

/// The write a caller asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteOp {
    Add,
    Update,
    Remove,
}

impl WriteOp {
    /// Classifies a document handed to `bulk_write`.
    pub(crate) fn classify(doc: &Document) -> Self {
        if doc.is_deleted() {
            WriteOp::Remove
        } else if doc.rev().is_some() {
            WriteOp::Update
        } else {
            WriteOp::Add
        }
    }
}

/// `"<generation>-<32 hex>"`, one generation past `prev`.
pub fn next_revision(prev: Option<&str>) -> String {
    let generation = prev
        .and_then(|rev| rev.split_once('-'))
        .and_then(|(n, _)| n.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

/// Checks `doc` against the stored row and produces the row to store.
pub(crate) fn resolve_write(
    existing: Option<&Document>,
    mut doc: Document,
    op: WriteOp,
) -> StorageResult<(Document, ChangeKind)> {
    let id = match doc.id() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(StorageError::InvalidDocument("document has no _id".to_string())),
    };
    let live = existing.filter(|row| !row.is_deleted());

    let kind = match op {
        WriteOp::Add => {
            if live.is_some() {
                return Err(StorageError::Conflict(id));
            }
            doc.remove(DELETED_FIELD);
            ChangeKind::Add
        }
        WriteOp::Update | WriteOp::Remove => {
            let current = live.ok_or_else(|| StorageError::NotFound(id.clone()))?;
            if doc.rev() != current.rev() {
                return Err(StorageError::Conflict(id));
            }
            if op == WriteOp::Remove {
                doc.insert(DELETED_FIELD.to_string(), Value::Bool(true));
                ChangeKind::Remove
            } else {
                doc.remove(DELETED_FIELD);
                ChangeKind::Update
            }
        }
    };

    let rev = next_revision(existing.and_then(|row| row.rev()));
    doc.insert(REV_FIELD.to_string(), Value::String(rev));
    Ok((doc, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn generations_increase() {
        let first = next_revision(None);
        assert!(first.starts_with("1-"));
        assert_eq!(first.len(), 2 + 32);
        assert!(next_revision(Some(&first)).starts_with("2-"));
        assert!(next_revision(Some("garbage")).starts_with("1-"));
    }

    #[test]
    fn add_over_live_doc_conflicts() {
        let (stored, _) = resolve_write(None, doc(json!({"_id": "a"})), WriteOp::Add).unwrap();
        let err = resolve_write(Some(&stored), doc(json!({"_id": "a"})), WriteOp::Add).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn add_over_tombstone_continues_lineage() {
        let (stored, _) = resolve_write(None, doc(json!({"_id": "a"})), WriteOp::Add).unwrap();
        let (tomb, kind) = resolve_write(Some(&stored), stored.clone(), WriteOp::Remove).unwrap();
        assert_eq!(kind, ChangeKind::Remove);
        let (again, kind) = resolve_write(Some(&tomb), doc(json!({"_id": "a"})), WriteOp::Add).unwrap();
        assert_eq!(kind, ChangeKind::Add);
        assert!(again.rev().unwrap().starts_with("3-"));
        assert!(!again.is_deleted());
    }

    #[test]
    fn stale_rev_conflicts_and_missing_is_not_found() {
        let (stored, _) = resolve_write(None, doc(json!({"_id": "a"})), WriteOp::Add).unwrap();
        let stale = doc(json!({"_id": "a", "_rev": "1-old"}));
        assert!(resolve_write(Some(&stored), stale, WriteOp::Update).unwrap_err().is_conflict());
        assert!(resolve_write(None, doc(json!({"_id": "b", "_rev": "1-x"})), WriteOp::Update)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn missing_id_is_invalid() {
        assert!(matches!(
            resolve_write(None, doc(json!({"v": 1})), WriteOp::Add),
            Err(StorageError::InvalidDocument(_))
        ));
    }

    #[test]
    fn classify_bulk_docs() {
        assert_eq!(WriteOp::classify(&doc(json!({"_id": "a"}))), WriteOp::Add);
        assert_eq!(WriteOp::classify(&doc(json!({"_id": "a", "_rev": "1-x"}))), WriteOp::Update);
        assert_eq!(WriteOp::classify(&doc(json!({"_id": "a", "_rev": "1-x", "_deleted": true}))), WriteOp::Remove);
    }
}
