//! Document storage layer for docseal.
//!
//! Defines the [`DocumentStore`] seam the encryption layer sits in front of,
//! plus two backends:
//!
//! - [`MemoryStore`] for tests and ephemeral scopes
//! - [`DuckDbStore`] for persistent local storage
//!
//! # Architecture
//!
//! - Documents are CouchDB-style JSON objects with `_id` / `_rev`
//! - Deletes write tombstones so revision lineage is preserved
//! - Every write is announced synchronously on the store's [`ChangeFeed`]

mod duckdb_store;
mod error;
mod feed;
mod memory_store;
mod revision;
mod store;

pub use duckdb_store::DuckDbStore;
pub use error::{StorageError, StorageResult};
pub use feed::{ChangeFeed, ChangeKind, ChangeListener, StoreChange, SubscriptionId};
pub use memory_store::MemoryStore;
pub use revision::next_revision;
pub use store::{DocumentStore, IdRange};
