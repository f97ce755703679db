//! Transparent password-derived encryption over a document store.
//!
//! [`CryptoStore`] sits in front of any [`docseal_storage::DocumentStore`]
//! and seals document bodies on write, opening them again on read. The
//! store only ever sees the envelope members and ciphertext.
//!
//! # Architecture
//!
//! - **Key registry**: tree of scopes; prefix views share the root key,
//!   password scopes hold their own
//! - **Lifecycle**: setup / unlock / lock / change / reset, persisted as a
//!   salt document plus ten reset-key slots
//! - **Document locks**: fail-fast mutual exclusion for read-modify-write
//! - **Event cascade**: decrypted change events per scope, subscribed
//!   upstream only while someone listens

mod config;
mod error;
mod events;
mod lifecycle;
mod lock;
mod registry;
mod reset_keys;
mod store;

pub use config::CryptoConfig;
pub use error::{VaultError, VaultResult};
pub use events::{ChangeEvent, EventHandler, EventName, EventNode, ListenerId};
pub use lifecycle::{PasswordChange, Status};
pub use lock::{DocumentLocks, LockGuard};
pub use registry::KeyRegistry;
pub use store::{CryptoStore, CryptoStoreBuilder};
