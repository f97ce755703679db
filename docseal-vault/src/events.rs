//! Change event cascade.
//!
//! Every scope has an [`EventNode`]. Nodes that hold a key (the root and
//! password scopes) listen to the store's raw change feed and decrypt;
//! prefix nodes listen to their parent's decrypted events and drop those
//! outside their prefix. A node only subscribes upstream while it has at
//! least one listener or child relay, and unsubscribes when the last one
//! goes away.

use crate::registry::KeyRegistry;
use docseal_crypto::decrypt_document;
use docseal_storage::{ChangeKind, DocumentStore, StoreChange, SubscriptionId};
use docseal_types::{is_key_material_doc_id, Document, DocumentExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

/// Channels a listener can attach to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventName {
    Add,
    Update,
    Remove,
    /// Every add, update and remove.
    Change,
    /// A document in scope that was sealed under a different key.
    ChangeWithOtherPassword,
    /// A document the root key should open but cannot.
    Error,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::Add => "add",
            EventName::Update => "update",
            EventName::Remove => "remove",
            EventName::Change => "change",
            EventName::ChangeWithOtherPassword => "change-with-other-password",
            EventName::Error => "error",
        }
    }

    fn for_kind(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Add => EventName::Add,
            ChangeKind::Update => EventName::Update,
            ChangeKind::Remove => EventName::Remove,
        }
    }
}

/// A change as seen by a scope. `doc` is decrypted, except on the
/// `ChangeWithOtherPassword` and `Error` channels where it is the stored
/// document.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub doc: Document,
}

pub type EventHandler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

type Relay = Arc<dyn Fn(EventName, &ChangeEvent) + Send + Sync>;

/// Handle returned by `on` / `one`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    name: EventName,
    handler: EventHandler,
    once: bool,
}

enum Source {
    Store {
        store: Arc<dyn DocumentStore>,
        registry: Arc<KeyRegistry>,
        root: bool,
    },
    Parent(Arc<EventNode>),
}

enum Upstream {
    Feed(SubscriptionId),
    Relay(ListenerId),
}

#[derive(Default)]
struct Subscribers {
    listeners: Vec<Listener>,
    relays: Vec<(ListenerId, Relay)>,
    upstream: Option<Upstream>,
}

impl Subscribers {
    fn is_empty(&self) -> bool {
        self.listeners.is_empty() && self.relays.is_empty()
    }
}

pub struct EventNode {
    source: Source,
    prefix: Option<String>,
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

impl EventNode {
    fn new(source: Source, prefix: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            source,
            prefix,
            subscribers: Mutex::new(Subscribers::default()),
            next_id: AtomicU64::new(0),
        })
    }

    pub(crate) fn root(store: Arc<dyn DocumentStore>, registry: Arc<KeyRegistry>) -> Arc<Self> {
        Self::new(
            Source::Store {
                store,
                registry,
                root: true,
            },
            None,
        )
    }

    /// Node of a password scope, optionally limited to `prefix`.
    pub(crate) fn password(
        store: Arc<dyn DocumentStore>,
        registry: Arc<KeyRegistry>,
        prefix: Option<String>,
    ) -> Arc<Self> {
        Self::new(
            Source::Store {
                store,
                registry,
                root: false,
            },
            prefix,
        )
    }

    /// Node of a prefix view below `parent`. `prefix` is the full prefix.
    pub(crate) fn prefixed(parent: &Arc<Self>, prefix: String) -> Arc<Self> {
        Self::new(Source::Parent(Arc::clone(parent)), Some(prefix))
    }

    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on<F>(self: &Arc<Self>, name: EventName, handler: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.add_listener(name, Arc::new(handler), false)
    }

    /// Like [`EventNode::on`], removed after the first delivery.
    pub fn one<F>(self: &Arc<Self>, name: EventName, handler: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.add_listener(name, Arc::new(handler), true)
    }

    /// Returns false if `id` was not registered here.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut subs = self.subscribers();
        let before = subs.listeners.len() + subs.relays.len();
        subs.listeners.retain(|listener| listener.id != id);
        subs.relays.retain(|(relay, _)| *relay != id);
        let removed = subs.listeners.len() + subs.relays.len() != before;
        if removed && subs.is_empty() {
            self.disconnect(&mut subs);
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        let subs = self.subscribers();
        subs.listeners.len() + subs.relays.len()
    }

    /// Whether this node currently listens upstream.
    pub fn is_connected(&self) -> bool {
        self.subscribers().upstream.is_some()
    }

    fn add_listener(self: &Arc<Self>, name: EventName, handler: EventHandler, once: bool) -> ListenerId {
        let id = self.next_listener_id();
        let mut subs = self.subscribers();
        subs.listeners.push(Listener {
            id,
            name,
            handler,
            once,
        });
        self.ensure_connected(&mut subs);
        id
    }

    fn add_relay(self: &Arc<Self>, relay: Relay) -> ListenerId {
        let id = self.next_listener_id();
        let mut subs = self.subscribers();
        subs.relays.push((id, relay));
        self.ensure_connected(&mut subs);
        id
    }

    fn ensure_connected(self: &Arc<Self>, subs: &mut Subscribers) {
        if subs.upstream.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let upstream = match &self.source {
            Source::Store { store, .. } => {
                Upstream::Feed(store.changes().subscribe(Arc::new(move |change: &StoreChange| {
                    if let Some(node) = weak.upgrade() {
                        node.on_store_change(change);
                    }
                })))
            }
            Source::Parent(parent) => {
                Upstream::Relay(parent.add_relay(Arc::new(move |name: EventName, event: &ChangeEvent| {
                    if let Some(node) = weak.upgrade() {
                        node.on_parent_event(name, event);
                    }
                })))
            }
        };
        debug!("Event node subscribed upstream (prefix {:?})", self.prefix);
        subs.upstream = Some(upstream);
    }

    fn disconnect(&self, subs: &mut Subscribers) {
        let Some(upstream) = subs.upstream.take() else {
            return;
        };
        match (upstream, &self.source) {
            (Upstream::Feed(id), Source::Store { store, .. }) => {
                store.changes().unsubscribe(id);
            }
            (Upstream::Relay(id), Source::Parent(parent)) => {
                parent.off(id);
            }
            _ => {}
        }
        debug!("Event node unsubscribed upstream (prefix {:?})", self.prefix);
    }

    fn in_scope(&self, doc: &Document) -> bool {
        match (&self.prefix, doc.id()) {
            (None, _) => true,
            (Some(prefix), Some(id)) => id.starts_with(prefix.as_str()),
            (Some(_), None) => false,
        }
    }

    fn on_store_change(&self, change: &StoreChange) {
        let Source::Store { registry, root, .. } = &self.source else {
            return;
        };
        if change.doc.id().is_some_and(is_key_material_doc_id) || !self.in_scope(&change.doc) {
            return;
        }
        let key = match registry.key() {
            Ok(key) => key,
            Err(_) => {
                debug!(
                    "Dropping {} event for {:?}: scope is locked",
                    change.kind.as_str(),
                    change.doc.id()
                );
                return;
            }
        };

        match decrypt_document(&key, &change.doc) {
            Ok(doc) => {
                let event = ChangeEvent {
                    kind: change.kind,
                    doc,
                };
                self.dispatch(EventName::for_kind(change.kind), &event);
                self.dispatch(EventName::Change, &event);
            }
            Err(err) => {
                let event = ChangeEvent {
                    kind: change.kind,
                    doc: change.doc.clone(),
                };
                if err.is_authentication() && !*root {
                    self.dispatch(EventName::ChangeWithOtherPassword, &event);
                } else {
                    error!(
                        "Failed to decrypt {} event for {:?}: {}",
                        change.kind.as_str(),
                        change.doc.id(),
                        err
                    );
                    self.dispatch(EventName::Error, &event);
                }
            }
        }
    }

    fn on_parent_event(&self, name: EventName, event: &ChangeEvent) {
        if self.in_scope(&event.doc) {
            self.dispatch(name, event);
        }
    }

    /// Delivers to a snapshot of the matching listeners, then to child
    /// relays. No lock is held while handlers run.
    fn dispatch(&self, name: EventName, event: &ChangeEvent) {
        let (handlers, relays) = {
            let mut subs = self.subscribers();
            let mut handlers = Vec::new();
            subs.listeners.retain(|listener| {
                if listener.name != name {
                    return true;
                }
                handlers.push(Arc::clone(&listener.handler));
                !listener.once
            });
            let relays: Vec<Relay> = subs.relays.iter().map(|(_, relay)| Arc::clone(relay)).collect();
            if subs.is_empty() {
                self.disconnect(&mut subs);
            }
            (handlers, relays)
        };

        for handler in handlers {
            handler(event);
        }
        for relay in relays {
            relay(name, event);
        }
    }
}

impl Drop for EventNode {
    fn drop(&mut self) {
        let mut subs = std::mem::take(&mut *self.subscribers());
        self.disconnect(&mut subs);
    }
}
