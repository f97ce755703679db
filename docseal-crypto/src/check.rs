//! Password check: a sealed random probe stored beside the salt.
//!
//! Opening it proves a candidate key is right without touching user data.

use crate::envelope::{EncryptedEnvelope, decrypt_value, encrypt_value};
use crate::error::CryptoResult;
use crate::key::DerivedKey;
use docseal_types::SALT_DOC_ID;
use rand::RngCore;
use serde_json::Value;

/// Member of the salt document holding the check.
pub const CHECK_FIELD: &str = "check";

const PROBE_BYTES: usize = 64;

/// Seals a fresh random probe under `key`, bound to the salt document id.
pub fn create_password_check(key: &DerivedKey) -> CryptoResult<EncryptedEnvelope> {
    let mut probe = [0u8; PROBE_BYTES];
    rand::rng().fill_bytes(&mut probe);
    encrypt_value(key, &Value::String(hex::encode(probe)), Some(SALT_DOC_ID))
}

/// Verifies that `key` opens `check`.
pub fn verify_password_check(key: &DerivedKey, check: &EncryptedEnvelope) -> CryptoResult<()> {
    decrypt_value(key, check, Some(SALT_DOC_ID)).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_random_key;

    #[test]
    fn check_verifies_only_with_its_key() {
        let key = generate_random_key();
        let check = create_password_check(&key).unwrap();
        assert!(verify_password_check(&key, &check).is_ok());
        assert!(verify_password_check(&generate_random_key(), &check).unwrap_err().is_authentication());
    }

    #[test]
    fn probes_differ() {
        let key = generate_random_key();
        let a = create_password_check(&key).unwrap();
        let b = create_password_check(&key).unwrap();
        assert_ne!(a.data, b.data);
        assert_eq!(a.data.len(), 2 * (PROBE_BYTES * 2 + 2));
    }
}
