//! Cryptographic primitives for envsync.
//!
//! This module provides:
//! - PBKDF2-HMAC-SHA512 account key derivation
//! - AES-256-GCM payload encryption/decryption
//! - SHA-256 content fingerprints for change detection
//! - RSA-2048/OAEP device keypairs for key-material wrapping

pub mod cipher;
pub mod kdf;
pub mod keypair;

pub use cipher::{content_hash, decrypt, decrypt_to_string, encrypt, EncryptedPayload, SymmetricKey};
pub use kdf::{derive_key, KeyMaterial, PBKDF2_ITERATIONS};
pub use keypair::{unwrap, wrap_key_material, AccountKeys, DeviceKeyPair};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Authentication tag mismatch: the payload was tampered with or
    /// encrypted under a different key.
    #[error("Decryption failed - data may have been tampered with")]
    Decryption,

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Key error: {0}")]
    Key(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
