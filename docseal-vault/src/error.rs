//! Vault error types.

use docseal_crypto::CryptoError;
use docseal_storage::StorageError;
use thiserror::Error;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Wrong password, failed password check, invalid reset key, or an
    /// operation that needs a key while the scope is locked.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad argument: {0}")]
    BadArgument(String),

    /// A specific document failed to authenticate under the active key.
    #[error("{0}")]
    Authentication(String),

    /// The document is being mutated by another call. Retryable.
    #[error("document {id} is locked by another operation")]
    LockConflict { id: String },

    #[error("missing document: {0}")]
    MissingDocument(String),

    #[error("store is already unlocked")]
    AlreadyUnlocked,

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl VaultError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, VaultError::Unauthorized(_))
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, VaultError::Authentication(_))
    }

    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, VaultError::LockConflict { .. })
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, VaultError::MissingDocument(_))
    }

    pub(crate) fn locked() -> Self {
        VaultError::Unauthorized("store is locked".to_string())
    }
}

impl From<StorageError> for VaultError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => VaultError::MissingDocument(id),
            other => VaultError::Storage(other),
        }
    }
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        if err.is_authentication() {
            VaultError::Authentication(err.to_string())
        } else {
            VaultError::Crypto(err)
        }
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(err: tokio::task::JoinError) -> Self {
        VaultError::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docseal_crypto::AUTH_FAILED_MESSAGE;

    #[test]
    fn authentication_keeps_recognizable_message() {
        let err = VaultError::from(CryptoError::Authentication);
        assert!(err.is_authentication());
        assert_eq!(err.to_string(), AUTH_FAILED_MESSAGE);
    }

    #[test]
    fn not_found_becomes_missing_document() {
        let err = VaultError::from(StorageError::NotFound("a".into()));
        assert!(err.is_missing());
        assert!(matches!(
            VaultError::from(StorageError::Conflict("a".into())),
            VaultError::Storage(StorageError::Conflict(_))
        ));
    }
}
