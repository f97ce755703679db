//! AES-256-GCM seal/open with detached tags.

use crate::error::{CryptoError, CryptoResult};
use crate::key::KEY_SIZE;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use rand::RngCore;

/// 96-bit GCM nonce.
pub const NONCE_SIZE: usize = 12;
/// 128-bit authentication tag.
pub const TAG_SIZE: usize = 16;

/// Output of [`seal`]: ciphertext plus its detached tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Fresh random nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

fn cipher_for(key: &[u8]) -> CryptoResult<Aes256Gcm> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_SIZE,
        actual: key.len(),
    })
}

fn check_len(field: &'static str, actual: usize, expected: usize) -> CryptoResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(CryptoError::InvalidLength {
            field,
            expected,
            actual,
        })
    }
}

/// Encrypts `plaintext` under `key`, authenticating `aad` alongside it.
pub fn seal(key: &[u8], nonce: &[u8], plaintext: &[u8], aad: Option<&[u8]>) -> CryptoResult<Sealed> {
    let cipher = cipher_for(key)?;
    check_len("nonce", nonce.len(), NONCE_SIZE)?;

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad.unwrap_or_default(), &mut buffer)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());
    Ok(Sealed {
        tag: tag_bytes,
        ciphertext: buffer,
    })
}

/// Decrypts and verifies. Any mismatch yields [`CryptoError::Authentication`]
/// and no plaintext.
pub fn open(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: Option<&[u8]>,
) -> CryptoResult<Vec<u8>> {
    let cipher = cipher_for(key)?;
    check_len("nonce", nonce.len(), NONCE_SIZE)?;
    check_len("tag", tag.len(), TAG_SIZE)?;

    let mut buffer = ciphertext.to_vec();
    match cipher.decrypt_in_place_detached(
        Nonce::from_slice(nonce),
        aad.unwrap_or_default(),
        &mut buffer,
        Tag::from_slice(tag),
    ) {
        Ok(()) => Ok(buffer),
        Err(_) => Err(CryptoError::Authentication),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_random_key;

    #[test]
    fn seal_open_round_trip() {
        let key = generate_random_key();
        let nonce = generate_nonce();
        let sealed = seal(key.as_bytes(), &nonce, b"hello", Some(b"doc-1")).unwrap();
        assert_eq!(sealed.ciphertext.len(), 5);

        let plain = open(key.as_bytes(), &nonce, &sealed.ciphertext, &sealed.tag, Some(b"doc-1")).unwrap();
        assert_eq!(plain, b"hello");
    }

    #[test]
    fn missing_aad_is_empty_aad() {
        let key = generate_random_key();
        let nonce = generate_nonce();
        let sealed = seal(key.as_bytes(), &nonce, b"x", None).unwrap();
        assert!(open(key.as_bytes(), &nonce, &sealed.ciphertext, &sealed.tag, Some(b"")).is_ok());
    }

    #[test]
    fn short_key_rejected_before_crypto() {
        let nonce = generate_nonce();
        let err = seal(&[0u8; 16], &nonce, b"x", None).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { expected: 32, actual: 16 }));

        let err = open(&[0u8; 31], &nonce, b"x", &[0u8; TAG_SIZE], None).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { .. }));
    }

    #[test]
    fn bad_nonce_and_tag_lengths_rejected() {
        let key = generate_random_key();
        assert!(matches!(
            seal(key.as_bytes(), &[0u8; 8], b"x", None),
            Err(CryptoError::InvalidLength { field: "nonce", .. })
        ));
        assert!(matches!(
            open(key.as_bytes(), &generate_nonce(), b"x", &[0u8; 4], None),
            Err(CryptoError::InvalidLength { field: "tag", .. })
        ));
    }
}
