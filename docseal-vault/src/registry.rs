//! Key registry: the in-memory record of which key a scope uses.
//!
//! Registries form a tree. The root node and every password scope own a
//! key slot; prefix scopes hold only a parent link and resolve through it,
//! so a password change on the root is immediately visible to every prefix
//! view below it.

use crate::error::{VaultError, VaultResult};
use docseal_crypto::{DerivedKey, Salt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

struct KeyState {
    key: Arc<DerivedKey>,
    salt: Salt,
}

pub struct KeyRegistry {
    slot: RwLock<Option<KeyState>>,
    parent: Option<Arc<KeyRegistry>>,
    independent: bool,
    check_repair: AtomicBool,
}

impl KeyRegistry {
    fn node(parent: Option<Arc<KeyRegistry>>, independent: bool) -> Self {
        Self {
            slot: RwLock::new(None),
            parent,
            independent,
            check_repair: AtomicBool::new(false),
        }
    }

    /// The locked root of a store.
    pub fn root() -> Arc<Self> {
        Arc::new(Self::node(None, false))
    }

    /// A password scope holding its own key, with no parent link.
    pub fn independent(key: DerivedKey, salt: Salt) -> Arc<Self> {
        let registry = Self::node(None, true);
        registry.install(key, salt);
        Arc::new(registry)
    }

    /// A prefix view sharing `parent`'s key.
    pub fn child(parent: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self::node(Some(Arc::clone(parent)), parent.is_independent()))
    }

    /// True for password scopes and prefix views below them.
    pub fn is_independent(&self) -> bool {
        self.independent
    }

    /// The node that actually owns the key slot for this scope.
    fn owner(&self) -> &KeyRegistry {
        match &self.parent {
            Some(parent) => parent.owner(),
            None => self,
        }
    }

    fn read_slot(&self) -> std::sync::RwLockReadGuard<'_, Option<KeyState>> {
        self.owner().slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The active key. Callers keep the returned handle for the duration
    /// of one operation; a concurrent `lock()` does not revoke it.
    pub fn key(&self) -> VaultResult<Arc<DerivedKey>> {
        self.read_slot()
            .as_ref()
            .map(|state| Arc::clone(&state.key))
            .ok_or_else(VaultError::locked)
    }

    pub fn salt(&self) -> Option<Salt> {
        self.read_slot().as_ref().map(|state| state.salt.clone())
    }

    pub fn is_unlocked(&self) -> bool {
        self.read_slot().is_some()
    }

    /// Replaces the key of the owning node, wiping the previous one.
    pub(crate) fn install(&self, key: impl Into<Arc<DerivedKey>>, salt: Salt) {
        let owner = self.owner();
        let previous = owner
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(KeyState {
                key: key.into(),
                salt,
            });
        owner.check_repair.store(false, Ordering::SeqCst);
        if let Some(state) = previous {
            retire(state);
        }
    }

    /// Wipes and forgets the key. Returns false if already locked.
    pub fn lock(&self) -> bool {
        let owner = self.owner();
        let previous = owner.slot.write().unwrap_or_else(PoisonError::into_inner).take();
        owner.check_repair.store(false, Ordering::SeqCst);
        match previous {
            Some(state) => {
                retire(state);
                true
            }
            None => false,
        }
    }

    pub(crate) fn schedule_check_repair(&self) {
        self.owner().check_repair.store(true, Ordering::SeqCst);
    }

    /// Claims the pending password-check repair, at most once.
    pub(crate) fn take_check_repair(&self) -> bool {
        self.owner().check_repair.swap(false, Ordering::SeqCst)
    }
}

fn retire(state: KeyState) {
    match Arc::try_unwrap(state.key) {
        Ok(mut key) => key.wipe(),
        // An in-flight operation still holds it; its drop zeroizes.
        Err(_) => debug!("Key still referenced by an in-flight operation"),
    }
}
