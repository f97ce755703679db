//! Synchronous change notifications.
//!
//! Stores emit every successful write to their feed before the write call
//! returns, so a listener attached before a mutation is guaranteed to see
//! it. Listeners run on the writer's task and must not block.

use docseal_types::Document;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// What a write did to a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Update => "update",
            ChangeKind::Remove => "remove",
        }
    }
}

/// A raw (still encrypted) change as written to the store.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreChange {
    pub kind: ChangeKind,
    pub doc: Document,
}

pub type ChangeListener = Arc<dyn Fn(&StoreChange) + Send + Sync>;

/// Handle returned by [`ChangeFeed::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Listener registry for one store.
#[derive(Default)]
pub struct ChangeFeed {
    listeners: Mutex<Vec<(SubscriptionId, ChangeListener)>>,
    next_id: AtomicU64,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: ChangeListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        listeners.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Delivers `change` to a snapshot of the current listeners, so
    /// listeners may subscribe or unsubscribe while being called.
    pub fn emit(&self, change: &StoreChange) {
        let snapshot: Vec<ChangeListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(change);
        }
    }
}
