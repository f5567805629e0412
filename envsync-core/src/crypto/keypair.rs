//! RSA device keypairs and account key-material unwrapping.
//!
//! Key flow:
//! Device RSA-2048 keypair → public key sent to pairing service →
//! service wraps account key material (RSA-OAEP/SHA-256) →
//! device unwraps → PBKDF2(material, account id) → symmetric sync key
//!
//! The private key never leaves the device's secret vault.

use crate::crypto::{
    cipher::SymmetricKey,
    kdf::{derive_key, KeyMaterial},
    CryptoError, Result,
};
use crate::storage::{secret_keys, SecretVault};
use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::info;

/// RSA modulus size in bits
pub const RSA_KEY_BITS: usize = 2048;

/// A device's RSA keypair
pub struct DeviceKeyPair {
    private_key: RsaPrivateKey,
}

impl DeviceKeyPair {
    /// Generate a fresh RSA-2048 keypair
    pub fn generate() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_BITS)
            .map_err(|e| CryptoError::Key(format!("RSA key generation failed: {}", e)))?;
        Ok(Self { private_key })
    }

    /// Load a keypair from a PKCS#8 PEM private key
    pub fn from_private_pem(pem: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| CryptoError::MalformedInput(format!("Invalid private key: {}", e)))?;
        Ok(Self { private_key })
    }

    /// PKCS#8 PEM encoding of the private key
    pub fn private_key_pem(&self) -> Result<String> {
        self.private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| CryptoError::Key(format!("Private key encoding failed: {}", e)))
    }

    /// SPKI PEM encoding of the public key, as handed to the pairing service
    pub fn public_key_pem(&self) -> Result<String> {
        RsaPublicKey::from(&self.private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Key(format!("Public key encoding failed: {}", e)))
    }

    /// Unwrap key material that was wrapped with this device's public key
    pub fn unwrap(&self, wrapped_key_material: &str) -> Result<KeyMaterial> {
        let wrapped = STANDARD.decode(wrapped_key_material.trim()).map_err(|e| {
            CryptoError::MalformedInput(format!("Wrapped key material is not base64: {}", e))
        })?;

        self.private_key
            .decrypt(Oaep::new::<Sha256>(), &wrapped)
            .map(KeyMaterial::new)
            .map_err(|_| CryptoError::Decryption)
    }

    /// Load this device's keypair from the vault, generating and storing
    /// one on first use. Returns the keypair; its public key is what the
    /// pairing service needs.
    pub fn load_or_create(vault: &dyn SecretVault) -> crate::Result<Self> {
        if let Some(pem) = vault.get(secret_keys::PRIVATE_KEY)? {
            return Ok(Self::from_private_pem(&pem)?);
        }

        info!("Generating device keypair");
        let keypair = Self::generate()?;
        vault.set(secret_keys::PRIVATE_KEY, &keypair.private_key_pem()?)?;
        vault.set(secret_keys::PUBLIC_KEY, &keypair.public_key_pem()?)?;
        Ok(keypair)
    }
}

/// Unwrap base64 key material with a PEM private key.
pub fn unwrap(private_key_pem: &str, wrapped_key_material: &str) -> Result<KeyMaterial> {
    DeviceKeyPair::from_private_pem(private_key_pem)?.unwrap(wrapped_key_material)
}

/// Wrap key material for a device's public key (RSA-OAEP/SHA-256).
///
/// This is the inverse of [`unwrap`], normally performed by the pairing
/// service or by an already-paired device.
pub fn wrap_key_material(public_key_pem: &str, material: &KeyMaterial) -> Result<String> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| CryptoError::MalformedInput(format!("Invalid public key: {}", e)))?;

    let wrapped = public_key
        .encrypt(
            &mut rand::thread_rng(),
            Oaep::new::<Sha256>(),
            material.as_bytes(),
        )
        .map_err(|e| CryptoError::Encryption(format!("Key wrapping failed: {}", e)))?;

    Ok(STANDARD.encode(wrapped))
}

/// The account identity plus its derived sync key
pub struct AccountKeys {
    pub account_id: String,
    key: SymmetricKey,
}

impl AccountKeys {
    /// Derive the sync key from the secrets stored in the vault.
    ///
    /// Requires `account_id`, `wrapped_key_material` and `private_key`.
    pub fn load(vault: &dyn SecretVault) -> crate::Result<Self> {
        let account_id = required(vault, secret_keys::ACCOUNT_ID)?;
        let wrapped = required(vault, secret_keys::WRAPPED_KEY_MATERIAL)?;
        let private_pem = required(vault, secret_keys::PRIVATE_KEY)?;

        let material = unwrap(&private_pem, &wrapped)?;
        let key = derive_key(&material, &account_id)?;
        Ok(Self { account_id, key })
    }

    /// Complete pairing: verify the wrapped material unwraps with this
    /// device's private key, then persist it with the account id.
    pub fn pair(
        vault: &dyn SecretVault,
        account_id: &str,
        wrapped_key_material: &str,
    ) -> crate::Result<Self> {
        let private_pem = required(vault, secret_keys::PRIVATE_KEY)?;
        let material = unwrap(&private_pem, wrapped_key_material)?;
        let key = derive_key(&material, account_id)?;

        vault.set(secret_keys::ACCOUNT_ID, account_id)?;
        vault.set(secret_keys::WRAPPED_KEY_MATERIAL, wrapped_key_material)?;
        info!(account_id, "Device paired");

        Ok(Self {
            account_id: account_id.to_string(),
            key,
        })
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    pub fn into_key(self) -> SymmetricKey {
        self.key
    }
}

fn required(vault: &dyn SecretVault, name: &str) -> crate::Result<String> {
    vault.get(name)?.ok_or_else(|| {
        crate::EnvSyncError::InvalidInput(format!("Missing secret '{}'; pair this device first", name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySecretVault;
    use std::sync::OnceLock;

    // RSA key generation is slow in debug builds; share one keypair.
    fn shared_pem() -> &'static str {
        static PEM: OnceLock<String> = OnceLock::new();
        PEM.get_or_init(|| DeviceKeyPair::generate().unwrap().private_key_pem().unwrap())
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let keypair = DeviceKeyPair::from_private_pem(shared_pem()).unwrap();
        let material = KeyMaterial::new(b"account key material".to_vec());

        let wrapped = wrap_key_material(&keypair.public_key_pem().unwrap(), &material).unwrap();
        let unwrapped = keypair.unwrap(&wrapped).unwrap();

        assert_eq!(unwrapped.as_bytes(), material.as_bytes());
    }

    #[test]
    fn pem_roundtrip_preserves_key() {
        let keypair = DeviceKeyPair::from_private_pem(shared_pem()).unwrap();
        let reloaded = DeviceKeyPair::from_private_pem(&keypair.private_key_pem().unwrap()).unwrap();
        assert_eq!(
            keypair.public_key_pem().unwrap(),
            reloaded.public_key_pem().unwrap()
        );
    }

    #[test]
    fn corrupted_wrap_fails() {
        let keypair = DeviceKeyPair::from_private_pem(shared_pem()).unwrap();
        let material = KeyMaterial::new(b"material".to_vec());
        let wrapped = wrap_key_material(&keypair.public_key_pem().unwrap(), &material).unwrap();

        let mut bytes = STANDARD.decode(&wrapped).unwrap();
        bytes[10] ^= 0xFF;
        let corrupted = STANDARD.encode(bytes);

        assert!(matches!(keypair.unwrap(&corrupted), Err(CryptoError::Decryption)));
        assert!(matches!(
            keypair.unwrap("not base64!"),
            Err(CryptoError::MalformedInput(_))
        ));
    }

    #[test]
    fn invalid_pem_rejected() {
        assert!(DeviceKeyPair::from_private_pem("garbage").is_err());
        let material = KeyMaterial::new(b"x".to_vec());
        assert!(wrap_key_material("garbage", &material).is_err());
    }

    #[test]
    fn pair_then_load_derives_same_key() {
        let vault = MemorySecretVault::new();
        vault.set(secret_keys::PRIVATE_KEY, shared_pem()).unwrap();

        let keypair = DeviceKeyPair::load_or_create(&vault).unwrap();
        let material = KeyMaterial::new(b"shared across devices".to_vec());
        let wrapped = wrap_key_material(&keypair.public_key_pem().unwrap(), &material).unwrap();

        let paired = AccountKeys::pair(&vault, "acct_42", &wrapped).unwrap();
        let loaded = AccountKeys::load(&vault).unwrap();

        assert_eq!(loaded.account_id, "acct_42");
        assert_eq!(paired.key().as_bytes(), loaded.key().as_bytes());

        let direct = derive_key(&material, "acct_42").unwrap();
        assert_eq!(direct.as_bytes(), loaded.key().as_bytes());
    }

    #[test]
    fn load_without_pairing_fails() {
        let vault = MemorySecretVault::new();
        assert!(AccountKeys::load(&vault).is_err());
    }
}
