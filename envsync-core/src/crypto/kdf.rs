//! PBKDF2 key derivation for the account-wide sync key.
//!
//! Uses PBKDF2-HMAC-SHA512 with:
//! - 100,000 iterations
//! - Output length: 32 bytes (256 bits)
//! - Salt: the account id
//!
//! Salting with the account id (rather than a random salt) is what lets
//! every device holding the same key material rematerialize the same key.

use crate::crypto::{cipher::SymmetricKey, CryptoError, Result};
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Number of PBKDF2 rounds
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derived key length in bytes
pub const KEY_LENGTH: usize = 32;

/// Account key material, as unwrapped from the pairing service.
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl From<Vec<u8>> for KeyMaterial {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// Derive the account's symmetric sync key.
///
/// # Arguments
/// * `key_material` - Shared account key material
/// * `account_id` - Account identifier, used as the salt
///
/// # Returns
/// A 32-byte AES-256 key; identical on every device for the same inputs.
pub fn derive_key(key_material: &KeyMaterial, account_id: &str) -> Result<SymmetricKey> {
    derive_key_with_rounds(key_material, account_id, PBKDF2_ITERATIONS)
}

pub(crate) fn derive_key_with_rounds(
    key_material: &KeyMaterial,
    account_id: &str,
    rounds: u32,
) -> Result<SymmetricKey> {
    if key_material.is_empty() {
        return Err(CryptoError::KeyDerivation(
            "Key material is empty".to_string(),
        ));
    }
    if account_id.trim().is_empty() {
        return Err(CryptoError::KeyDerivation("Account id is empty".to_string()));
    }

    let mut key = [0u8; KEY_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha512>(
        key_material.as_bytes(),
        account_id.as_bytes(),
        rounds,
        &mut key,
    );

    let derived = SymmetricKey::from_bytes(key);
    key.zeroize();
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_deterministic() {
        let material = KeyMaterial::new(b"account-wide secret".to_vec());

        let key1 = derive_key(&material, "acct_123").unwrap();
        let key2 = derive_key(&material, "acct_123").unwrap();

        // Same material and account should produce the same key on every device
        assert_eq!(key1.as_bytes(), key2.as_bytes());
        assert_eq!(key1.as_bytes().len(), KEY_LENGTH);
    }

    #[test]
    fn account_id_salts_the_key() {
        let material = KeyMaterial::new(b"account-wide secret".to_vec());

        let key1 = derive_key_with_rounds(&material, "acct_a", 1_000).unwrap();
        let key2 = derive_key_with_rounds(&material, "acct_b", 1_000).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());

        let other = KeyMaterial::new(b"different secret".to_vec());
        let key3 = derive_key_with_rounds(&other, "acct_a", 1_000).unwrap();
        assert_ne!(key1.as_bytes(), key3.as_bytes());
    }

    #[test]
    fn empty_inputs_fail() {
        let material = KeyMaterial::new(b"secret".to_vec());
        let empty = KeyMaterial::new(Vec::new());

        assert!(matches!(
            derive_key(&empty, "acct"),
            Err(CryptoError::KeyDerivation(_))
        ));
        assert!(matches!(
            derive_key(&material, ""),
            Err(CryptoError::KeyDerivation(_))
        ));
        assert!(matches!(
            derive_key(&material, "   "),
            Err(CryptoError::KeyDerivation(_))
        ));
    }

    #[test]
    fn debug_does_not_leak_material() {
        let material = KeyMaterial::new(b"super secret".to_vec());
        let rendered = format!("{:?}", material);
        assert!(!rendered.contains("super"));
    }
}
