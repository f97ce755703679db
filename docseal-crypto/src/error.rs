//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Message carried by every authentication failure. Callers that need to
/// tell "wrong key / tampered data" apart from other failures match on it.
pub const AUTH_FAILED_MESSAGE: &str = "Unsupported state or unable to authenticate data";

/// Errors that can occur in the encryption layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid {field} length: expected {expected}, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The AEAD tag did not verify. Never carries partial plaintext.
    #[error("{AUTH_FAILED_MESSAGE}")]
    Authentication,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CryptoError {
    /// True for tag mismatches (wrong key, wrong AAD or tampered data).
    pub fn is_authentication(&self) -> bool {
        matches!(self, CryptoError::Authentication)
    }
}
