//! Encryption layer for docseal.
//!
//! Provides per-document encryption using:
//! - PBKDF2-HMAC-SHA256 (100k iterations) for key derivation from passwords
//! - AES-256-GCM with detached tags for authenticated encryption
//! - Zeroizing, non-copyable key buffers
//!
//! # Architecture
//!
//! A password scope has one data key, derived from the password and a
//! per-scope salt. Documents are sealed individually with the document id
//! as AAD, so ciphertext is bound to its location in the store.
//!
//! Two kinds of auxiliary records protect the key without exposing it:
//!
//! 1. **Password check**: a random probe sealed under the data key, letting
//!    unlock verify a password without touching user documents.
//!
//! 2. **Reset-key slots**: the data key wrapped under keys derived from
//!    one-time recovery passwords, for forgotten-password recovery.

pub mod check;
mod cipher;
mod document;
pub mod envelope;
mod error;
mod key;
pub mod recovery;

pub use check::{create_password_check, verify_password_check, CHECK_FIELD};
pub use cipher::{generate_nonce, open, seal, Sealed, NONCE_SIZE, TAG_SIZE};
pub use document::{decrypt_document, encrypt_document, is_encrypted, prefixed_id, DocumentOptions};
pub use envelope::{decrypt_value, encrypt_value, EncryptedEnvelope};
pub use error::{CryptoError, CryptoResult, AUTH_FAILED_MESSAGE};
pub use key::{
    derive_key, derive_key_with_salt, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE,
    SALT_HEX_LEN, SALT_SIZE,
};
pub use recovery::{create_reset_doc, generate_reset_key, open_reset_doc, RESET_SALT_FIELD};
