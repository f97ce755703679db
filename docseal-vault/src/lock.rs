//! Per-document write locks.
//!
//! Read-modify-write mutations hold the id they touch for their whole
//! duration. A second mutation on a held id fails immediately with
//! [`VaultError::LockConflict`] instead of queuing. Ids are tracked after
//! prefixing, so a prefix view and the root contend for the same document.

use crate::error::{VaultError, VaultResult};
use docseal_crypto::prefixed_id;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// The set of ids currently being mutated in one store.
#[derive(Debug, Default)]
pub struct DocumentLocks {
    held: Mutex<HashSet<String>>,
}

impl DocumentLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn held(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_locked(&self, prefix: Option<&str>, id: &str) -> bool {
        self.held().contains(&prefixed_id(id, prefix))
    }

    /// Locks one id or fails with a conflict.
    pub fn acquire(self: &Arc<Self>, prefix: Option<&str>, id: &str) -> VaultResult<LockGuard> {
        let (guard, mut failures) = self.acquire_many(prefix, &[id]);
        match failures.pop().flatten() {
            Some(err) => Err(err),
            None => Ok(guard),
        }
    }

    /// Locks every id it can. The second value has one slot per input:
    /// `None` when that id is now held by the guard, the reason otherwise.
    pub fn acquire_many<S: AsRef<str>>(
        self: &Arc<Self>,
        prefix: Option<&str>,
        ids: &[S],
    ) -> (LockGuard, Vec<Option<VaultError>>) {
        let mut held = self.held();
        let mut acquired = Vec::new();
        let failures = ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                if id.is_empty() {
                    return Some(VaultError::BadArgument("document id is empty".to_string()));
                }
                let full = prefixed_id(id, prefix);
                if held.insert(full.clone()) {
                    acquired.push(full);
                    None
                } else {
                    Some(VaultError::LockConflict { id: full })
                }
            })
            .collect();
        drop(held);

        let guard = LockGuard {
            locks: Arc::clone(self),
            ids: acquired,
        };
        (guard, failures)
    }
}

/// Ids held by one acquisition. Dropping the guard releases them.
#[must_use = "dropping the guard releases the lock immediately"]
#[derive(Debug)]
pub struct LockGuard {
    locks: Arc<DocumentLocks>,
    ids: Vec<String>,
}

impl LockGuard {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn release(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        let mut held = self.locks.held();
        for id in self.ids.drain(..) {
            held.remove(&id);
        }
    }
}
