//! Adversarial tests for the AES-256-GCM codec and document envelopes.
//!
//! Covers wrong-key decryption, tag and ciphertext tampering, AAD binding
//! and the plaintext-passthrough rules relied on by the vault.

use docseal_crypto::{
    decrypt_document, decrypt_value, encrypt_document, encrypt_value, generate_nonce,
    generate_random_key, open, seal, CryptoError, DocumentOptions, EncryptedEnvelope,
    AUTH_FAILED_MESSAGE,
};
use docseal_types::{Document, DocumentExt};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};

fn doc(value: Value) -> Document {
    value.as_object().cloned().expect("test document must be an object")
}

// ── Wrong Key ──

#[test]
fn decrypt_with_wrong_key_returns_authentication_error() {
    let key_a = generate_random_key();
    let key_b = generate_random_key();

    let env = encrypt_value(&key_a, &json!({"secret": true}), None).unwrap();
    let err = decrypt_value(&key_b, &env, None).unwrap_err();

    match err {
        CryptoError::Authentication => {
            assert!(err.to_string().contains(AUTH_FAILED_MESSAGE));
        }
        other => panic!("expected CryptoError::Authentication, got: {other:?}"),
    }
}

// ── Tampering ──

#[test]
fn every_bit_of_tag_is_checked() {
    let key = generate_random_key();
    let nonce = generate_nonce();
    let sealed = seal(key.as_bytes(), &nonce, b"integrity-protected", Some(b"id")).unwrap();

    for byte in 0..sealed.tag.len() {
        for bit in 0..8 {
            let mut tag = sealed.tag;
            tag[byte] ^= 1 << bit;
            for aad in [Some(&b"id"[..]), Some(&b"other"[..]), None] {
                assert!(
                    open(key.as_bytes(), &nonce, &sealed.ciphertext, &tag, aad).is_err(),
                    "flipping tag bit {bit} of byte {byte} must be detected"
                );
            }
        }
    }
}

#[test]
fn every_bit_of_data_is_checked() {
    let key = generate_random_key();
    let nonce = generate_nonce();
    let sealed = seal(key.as_bytes(), &nonce, b"short payload", Some(b"id")).unwrap();

    for byte in 0..sealed.ciphertext.len() {
        for bit in 0..8 {
            let mut data = sealed.ciphertext.clone();
            data[byte] ^= 1 << bit;
            let err = open(key.as_bytes(), &nonce, &data, &sealed.tag, Some(b"id")).unwrap_err();
            assert!(err.is_authentication());
        }
    }
}

#[test]
fn truncated_and_extended_data_fail() {
    let key = generate_random_key();
    let mut env = encrypt_value(&key, &json!("a longer value to truncate"), None).unwrap();
    let original = env.data.clone();

    env.data.truncate(10);
    assert!(decrypt_value(&key, &env, None).is_err());

    env.data = format!("{original}ff");
    assert!(decrypt_value(&key, &env, None).is_err());
}

#[test]
fn nonces_are_unique_per_encryption() {
    let key = generate_random_key();
    let a = encrypt_value(&key, &json!("same"), None).unwrap();
    let b = encrypt_value(&key, &json!("same"), None).unwrap();
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.data, b.data);
}

// ── AAD Binding ──

#[test]
fn document_copied_to_other_id_fails() {
    let key = generate_random_key();
    let sealed = encrypt_document(&key, doc(json!({"_id": "a", "v": 1})), None, &DocumentOptions::default()).unwrap();

    let mut moved = sealed.clone();
    moved.set_id("b");
    let err = decrypt_document(&key, &moved).unwrap_err();
    assert!(err.is_authentication());

    let envelope = EncryptedEnvelope::from_document(&sealed).unwrap();
    assert!(decrypt_value(&key, &envelope, Some("b")).is_err());
    assert!(decrypt_value(&key, &envelope, Some("a")).is_ok());
}

#[test]
fn prefixed_document_is_bound_to_full_id() {
    let key = generate_random_key();
    let sealed = encrypt_document(&key, doc(json!({"_id": "1", "v": 1})), Some("team/"), &DocumentOptions::default()).unwrap();
    let envelope = EncryptedEnvelope::from_document(&sealed).unwrap();
    assert!(decrypt_value(&key, &envelope, Some("1")).is_err());
    assert!(decrypt_value(&key, &envelope, Some("team/1")).is_ok());
}

// ── Passthrough ──

#[test]
fn plaintext_documents_pass_through() {
    let key = generate_random_key();
    let plain = doc(json!({"_id": "p", "title": "visible"}));
    assert_eq!(decrypt_document(&key, &plain).unwrap(), plain);
}

#[test]
fn short_tag_is_treated_as_plaintext() {
    let key = generate_random_key();
    let odd = doc(json!({"_id": "p", "nonce": "00", "tag": "abcd", "data": "00"}));
    assert_eq!(decrypt_document(&key, &odd).unwrap(), odd);
}

#[test]
fn well_formed_envelope_with_garbage_fails() {
    let key = generate_random_key();
    let garbage = doc(json!({
        "_id": "g",
        "nonce": "000000000000000000000000",
        "tag": "00000000000000000000000000000000",
        "data": "deadbeef",
    }));
    assert!(decrypt_document(&key, &garbage).unwrap_err().is_authentication());
}

// ── Round Trip ──

#[test]
fn decrypted_document_has_no_envelope_members() {
    let key = generate_random_key();
    let sealed = encrypt_document(&key, doc(json!({"_id": "x", "a": 1})), None, &DocumentOptions::default()).unwrap();
    let back = decrypt_document(&key, &sealed).unwrap();
    assert_eq!(back, doc(json!({"_id": "x", "a": 1})));
}

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn value_round_trip(value in json_value(), aad in proptest::option::of("[a-z/]{1,12}")) {
        let key = generate_random_key();
        let env = encrypt_value(&key, &value, aad.as_deref()).unwrap();
        prop_assert_eq!(decrypt_value(&key, &env, aad.as_deref()).unwrap(), value);
    }
}
