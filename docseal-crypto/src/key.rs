//! Key material: the data key, salts and PBKDF2 derivation.

use crate::error::{CryptoError, CryptoResult};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// Size of a data key in bytes (AES-256).
pub const KEY_SIZE: usize = 32;
/// Random bytes behind a salt.
pub const SALT_SIZE: usize = 16;
/// Length of the persisted (hex) salt.
pub const SALT_HEX_LEN: usize = SALT_SIZE * 2;

const WIPE_PASSES: usize = 3;

/// A 256-bit symmetric key.
///
/// Not `Clone`: a key lives in exactly one place and is shared through
/// `Arc`. The bytes sit in their own heap allocation so moving the handle
/// never leaves copies behind, and they are zeroed on drop.
pub struct DerivedKey {
    bytes: Box<[u8; KEY_SIZE]>,
}

impl DerivedKey {
    /// Takes ownership of raw key bytes. The caller's array is zeroed.
    pub fn from_bytes(mut bytes: [u8; KEY_SIZE]) -> Self {
        let key = Self {
            bytes: Box::new(bytes),
        };
        bytes.zeroize();
        key
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self::from_bytes(arr))
    }

    /// Parses a hex-encoded key (as stored inside reset-key slots).
    pub fn from_hex(encoded: &str) -> CryptoResult<Self> {
        let bytes = Zeroizing::new(
            hex::decode(encoded)
                .map_err(|e| CryptoError::MalformedEnvelope(format!("key is not hex: {e}")))?,
        );
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.bytes.as_slice()))
    }

    /// Constant-time comparison of two keys.
    pub fn matches(&self, other: &DerivedKey) -> bool {
        self.bytes
            .iter()
            .zip(other.bytes.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    /// Overwrites the key with random data several times, then zeroes it.
    pub fn wipe(&mut self) {
        let mut rng = rand::rng();
        for _ in 0..WIPE_PASSES {
            rng.fill_bytes(self.bytes.as_mut_slice());
        }
        self.bytes.zeroize();
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Generates a random data key (used for tests and wrapping keys).
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut bytes);
    DerivedKey::from_bytes(bytes)
}

/// Per-scope salt: exactly 32 hex characters.
///
/// The hex text itself (not the decoded bytes) is fed to PBKDF2, matching
/// the format existing stores were written with.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Salt(String);

impl Salt {
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Accepts exactly [`SALT_HEX_LEN`] hex digits.
    pub fn parse(candidate: &str) -> Option<Self> {
        if candidate.len() == SALT_HEX_LEN && candidate.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(candidate.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// PBKDF2 parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: 100_000,
        }
    }
}

/// Derives a key from `password` and `salt` with PBKDF2-HMAC-SHA256.
///
/// An absent or malformed salt is replaced by a fresh random one; the salt
/// actually used is returned alongside the key.
pub fn derive_key(
    password: &str,
    salt: Option<&str>,
    params: &KdfParams,
) -> CryptoResult<(DerivedKey, Salt)> {
    let salt = salt.and_then(Salt::parse).unwrap_or_else(Salt::random);
    let key = derive_key_with_salt(password, &salt, params)?;
    Ok((key, salt))
}

/// Derives a key for an already validated salt.
pub fn derive_key_with_salt(
    password: &str,
    salt: &Salt,
    params: &KdfParams,
) -> CryptoResult<DerivedKey> {
    if params.iterations == 0 {
        return Err(CryptoError::KeyDerivation(
            "iteration count must be positive".to_string(),
        ));
    }
    let mut out = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt.as_str().as_bytes(),
        params.iterations,
        &mut out,
    );
    Ok(DerivedKey::from_bytes(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams { iterations: 1_000 };

    #[test]
    fn derivation_is_deterministic() {
        let salt = Salt::random();
        let (a, sa) = derive_key("test", Some(salt.as_str()), &FAST).unwrap();
        let (b, sb) = derive_key("test", Some(salt.as_str()), &FAST).unwrap();
        assert_eq!(sa, salt);
        assert_eq!(sb, salt);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_salts_give_different_keys() {
        let (a, sa) = derive_key("test", None, &FAST).unwrap();
        let (b, sb) = derive_key("test", None, &FAST).unwrap();
        assert_ne!(sa, sb);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn malformed_salt_is_replaced() {
        let (_, salt) = derive_key("test", Some("not-hex"), &FAST).unwrap();
        assert_eq!(salt.as_str().len(), SALT_HEX_LEN);
        assert_ne!(salt.as_str(), "not-hex");

        let short = "abcdef";
        let (_, salt) = derive_key("test", Some(short), &FAST).unwrap();
        assert_ne!(salt.as_str(), short);
    }

    #[test]
    fn salt_parse_rules() {
        assert!(Salt::parse("0123456789abcdef0123456789ABCDEF").is_some());
        assert!(Salt::parse("0123456789abcdef0123456789abcde").is_none());
        assert!(Salt::parse("0123456789abcdef0123456789abcdeg").is_none());
    }

    #[test]
    fn zero_iterations_rejected() {
        let salt = Salt::random();
        let err = derive_key_with_salt("pw", &salt, &KdfParams { iterations: 0 }).unwrap_err();
        assert!(matches!(err, CryptoError::KeyDerivation(_)));
    }

    #[test]
    fn wipe_clears_key_bytes() {
        let mut key = generate_random_key();
        key.wipe();
        assert_eq!(key.as_bytes(), &[0u8; KEY_SIZE]);
    }

    #[test]
    fn hex_round_trip_and_length_check() {
        let key = generate_random_key();
        let back = DerivedKey::from_hex(&key.to_hex()).unwrap();
        assert!(key.matches(&back));
        assert!(matches!(
            DerivedKey::from_slice(&[1, 2, 3]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 3 })
        ));
    }

    #[test]
    fn debug_does_not_print_bytes() {
        let key = generate_random_key();
        assert_eq!(format!("{key:?}"), "DerivedKey([REDACTED])");
    }
}
