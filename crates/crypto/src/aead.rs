//! AES-256-GCM sealing with the `base64(nonce ‖ ciphertext)` wire format.
//!
//! The format is byte-exact: a fresh 12-byte nonce is prepended to the GCM
//! output (ciphertext + tag) and the whole blob is standard-base64 encoded.
//! Other implementations of the vault must reproduce it bit-for-bit.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;

use hg_domain::{Error, Result};

/// AES-256-GCM nonce length (96 bits).
pub const NONCE_LEN: usize = 12;

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|_| Error::validation("encryption key must be 32 bytes"))
}

/// Seal `plaintext` under `key`, returning `base64(nonce ‖ ciphertext)`.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<String> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| Error::internal("sealing payload"))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&sealed);
    Ok(BASE64.encode(blob))
}

/// Open a blob produced by [`encrypt`].
///
/// Any failure — bad base64, truncated input, wrong key, flipped bit — maps
/// to the same opaque integrity error so nothing about the cause leaks.
pub fn decrypt(key: &[u8], encoded: &str) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    let blob = BASE64
        .decode(encoded)
        .map_err(|_| Error::integrity("payload could not be opened"))?;
    if blob.len() < NONCE_LEN {
        return Err(Error::integrity("payload could not be opened"));
    }

    let (nonce_bytes, sealed) = blob.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| Error::integrity("payload could not be opened"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hg_domain::ErrorKind;

    const KEY: [u8; 32] = [0x42; 32];

    #[test]
    fn encrypt_decrypt_round_trip() {
        let sealed = encrypt(&KEY, b"super secret payload").unwrap();
        let opened = decrypt(&KEY, &sealed).unwrap();
        assert_eq!(opened, b"super secret payload");
    }

    #[test]
    fn nonce_makes_ciphertexts_unique() {
        let a = encrypt(&KEY, b"same plaintext").unwrap();
        let b = encrypt(&KEY, b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let sealed = encrypt(&KEY, b"payload").unwrap();
        let mut blob = BASE64.decode(&sealed).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        let tampered = BASE64.encode(blob);

        let err = decrypt(&KEY, &tampered).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = encrypt(&KEY, b"payload").unwrap();
        let other = [0x43u8; 32];
        assert!(decrypt(&other, &sealed).is_err());
    }

    #[test]
    fn input_shorter_than_nonce_is_rejected() {
        let short = BASE64.encode([0u8; NONCE_LEN - 1]);
        let err = decrypt(&KEY, &short).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn wrong_key_length_is_a_validation_error() {
        let err = encrypt(&[0u8; 16], b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn blob_layout_is_nonce_then_ciphertext() {
        let sealed = encrypt(&KEY, b"layout").unwrap();
        let blob = BASE64.decode(&sealed).unwrap();
        // 12-byte nonce, then ciphertext + 16-byte GCM tag.
        assert_eq!(blob.len(), NONCE_LEN + b"layout".len() + 16);
    }
}
