//! AES-256-GCM encryption and decryption for synced file contents.
//!
//! Uses AES-256-GCM with:
//! - 256-bit key
//! - 96-bit (12 byte) IV, freshly random per call
//! - 128-bit authentication tag
//!
//! Wire format of [`EncryptedPayload`]:
//! - `ciphertext`: `base64(ciphertext) ":" base64(tag)`
//! - `iv`: `base64(iv)`

use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

const IV_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const TAG_DELIMITER: char = ':';

/// The account's symmetric sync key
///
/// Derived from the shared key material, identical on every paired device,
/// and never persisted.
#[derive(Clone)]
pub struct SymmetricKey {
    key: [u8; 32],
}

impl SymmetricKey {
    /// Generate a new random key (tests and local-only use)
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self { key: key.into() }
    }

    /// Create a key from raw bytes (use with caution)
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Get the raw key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// An encrypted file payload as stored on the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// `base64(ciphertext):base64(tag)`
    pub ciphertext: String,

    /// Base64 IV (12 bytes)
    pub iv: String,
}

impl EncryptedPayload {
    /// Decrypt this payload with the given key
    pub fn open(&self, key: &SymmetricKey) -> Result<Vec<u8>> {
        decrypt(&self.ciphertext, &self.iv, key)
    }
}

/// Encrypt data using AES-256-GCM
///
/// A fresh random IV is generated on every call, never per file, so the
/// same key never sees the same IV twice.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<EncryptedPayload> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext_with_tag = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(format!("{}", e)))?;

    // aes-gcm appends the tag to the ciphertext
    if ciphertext_with_tag.len() < TAG_LENGTH {
        return Err(CryptoError::Encryption(
            "Ciphertext too short - missing auth tag".to_string(),
        ));
    }
    let (ciphertext, tag) = ciphertext_with_tag.split_at(ciphertext_with_tag.len() - TAG_LENGTH);

    Ok(EncryptedPayload {
        ciphertext: format!(
            "{}{}{}",
            STANDARD.encode(ciphertext),
            TAG_DELIMITER,
            STANDARD.encode(tag)
        ),
        iv: STANDARD.encode(nonce),
    })
}

/// Decrypt data using AES-256-GCM
///
/// Format violations (wrong number of parts, bad base64, wrong tag or IV
/// length) fail with [`CryptoError::MalformedInput`] before any decryption
/// is attempted. A tag that does not verify fails with
/// [`CryptoError::Decryption`].
pub fn decrypt(ciphertext: &str, iv: &str, key: &SymmetricKey) -> Result<Vec<u8>> {
    let parts: Vec<&str> = ciphertext.split(TAG_DELIMITER).collect();
    if parts.len() != 2 {
        return Err(CryptoError::MalformedInput(format!(
            "expected ciphertext and tag, got {} part(s)",
            parts.len()
        )));
    }

    let body = STANDARD
        .decode(parts[0])
        .map_err(|e| CryptoError::MalformedInput(format!("ciphertext is not base64: {}", e)))?;
    let tag = STANDARD
        .decode(parts[1])
        .map_err(|e| CryptoError::MalformedInput(format!("tag is not base64: {}", e)))?;
    if tag.len() != TAG_LENGTH {
        return Err(CryptoError::MalformedInput(format!(
            "tag must be {} bytes, got {}",
            TAG_LENGTH,
            tag.len()
        )));
    }

    let iv_bytes = STANDARD
        .decode(iv)
        .map_err(|e| CryptoError::MalformedInput(format!("iv is not base64: {}", e)))?;
    let iv_array: [u8; IV_LENGTH] = iv_bytes.as_slice().try_into().map_err(|_| {
        CryptoError::MalformedInput(format!(
            "iv must be {} bytes, got {}",
            IV_LENGTH,
            iv_bytes.len()
        ))
    })?;

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from(iv_array);

    let mut ciphertext_with_tag = body;
    ciphertext_with_tag.extend_from_slice(&tag);

    cipher
        .decrypt(&nonce, ciphertext_with_tag.as_slice())
        .map_err(|_| CryptoError::Decryption)
}

/// Decrypt to a string
pub fn decrypt_to_string(payload: &EncryptedPayload, key: &SymmetricKey) -> Result<String> {
    let bytes = payload.open(key)?;
    String::from_utf8(bytes)
        .map_err(|_| CryptoError::MalformedInput("plaintext is not valid UTF-8".to_string()))
}

/// SHA-256 fingerprint of plaintext, lowercase hex.
///
/// Used only for change detection and equality, never for secrecy.
pub fn content_hash(plaintext: &[u8]) -> String {
    hex::encode(Sha256::digest(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flip_char(s: &str, index: usize) -> String {
        let mut bytes = STANDARD.decode(s).unwrap();
        bytes[index] ^= 0xFF;
        STANDARD.encode(bytes)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = SymmetricKey::generate();
        let plaintext = b"API_KEY=abc123\nDATABASE_URL=postgres://localhost/db\n";

        let payload = encrypt(plaintext, &key).unwrap();
        let decrypted = decrypt(&payload.ciphertext, &payload.iv, &key).unwrap();

        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let key = SymmetricKey::generate();
        let payload = encrypt(b"", &key).unwrap();
        assert!(payload.open(&key).unwrap().is_empty());
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let key = SymmetricKey::generate();
        let plaintext = b"SAME=data";

        let p1 = encrypt(plaintext, &key).unwrap();
        let p2 = encrypt(plaintext, &key).unwrap();

        assert_ne!(p1.iv, p2.iv);
        assert_ne!(p1.ciphertext, p2.ciphertext);
        assert_eq!(p1.open(&key).unwrap(), p2.open(&key).unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = SymmetricKey::generate();
        let key2 = SymmetricKey::generate();

        let payload = encrypt(b"SECRET=1", &key1).unwrap();
        assert!(matches!(payload.open(&key2), Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_tampered_ciphertext_detected() {
        let key = SymmetricKey::generate();
        let mut payload = encrypt(b"SECRET=original", &key).unwrap();

        let (body, tag) = payload.ciphertext.split_once(':').unwrap();
        payload.ciphertext = format!("{}:{}", flip_char(body, 0), tag);

        assert!(matches!(payload.open(&key), Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_tampered_tag_detected() {
        let key = SymmetricKey::generate();
        let mut payload = encrypt(b"SECRET=original", &key).unwrap();

        let (body, tag) = payload.ciphertext.split_once(':').unwrap();
        payload.ciphertext = format!("{}:{}", body, flip_char(tag, 15));

        assert!(matches!(payload.open(&key), Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_tampered_iv_detected() {
        let key = SymmetricKey::generate();
        let mut payload = encrypt(b"SECRET=original", &key).unwrap();
        payload.iv = flip_char(&payload.iv, 3);

        assert!(matches!(payload.open(&key), Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_every_byte_is_authenticated() {
        let key = SymmetricKey::generate();
        let payload = encrypt(b"K=v", &key).unwrap();
        let (body, tag) = payload.ciphertext.split_once(':').unwrap();
        let body_len = STANDARD.decode(body).unwrap().len();

        for i in 0..body_len {
            let tampered = format!("{}:{}", flip_char(body, i), tag);
            assert!(decrypt(&tampered, &payload.iv, &key).is_err());
        }
        for i in 0..TAG_LENGTH {
            let tampered = format!("{}:{}", body, flip_char(tag, i));
            assert!(decrypt(&tampered, &payload.iv, &key).is_err());
        }
    }

    #[test]
    fn test_malformed_shapes_rejected() {
        let key = SymmetricKey::generate();
        let payload = encrypt(b"K=v", &key).unwrap();
        let (body, tag) = payload.ciphertext.split_once(':').unwrap();

        // Missing delimiter
        assert!(matches!(
            decrypt(body, &payload.iv, &key),
            Err(CryptoError::MalformedInput(_))
        ));
        // Too many parts
        let three = format!("{}:{}:{}", body, tag, tag);
        assert!(matches!(
            decrypt(&three, &payload.iv, &key),
            Err(CryptoError::MalformedInput(_))
        ));
        // Short tag
        let short_tag = format!("{}:{}", body, STANDARD.encode([0u8; 8]));
        assert!(matches!(
            decrypt(&short_tag, &payload.iv, &key),
            Err(CryptoError::MalformedInput(_))
        ));
        // Not base64
        assert!(matches!(
            decrypt("!!!:???", &payload.iv, &key),
            Err(CryptoError::MalformedInput(_))
        ));
        // Bad IV length
        assert!(matches!(
            decrypt(&payload.ciphertext, &STANDARD.encode([0u8; 8]), &key),
            Err(CryptoError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_content_hash() {
        // SHA-256("abc")
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(content_hash(b"A=1"), content_hash(b"A=1"));
        assert_ne!(content_hash(b"A=1"), content_hash(b"A=2"));
    }

    #[test]
    fn test_decrypt_to_string() {
        let key = SymmetricKey::generate();
        let payload = encrypt("TOKEN=ünïcode".as_bytes(), &key).unwrap();
        assert_eq!(decrypt_to_string(&payload, &key).unwrap(), "TOKEN=ünïcode");
    }
}
