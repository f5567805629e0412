//! Host-provided persistence boundaries.
//!
//! Two substrates sit under the engine:
//! - [`KvStore`]: durable named blobs (sync metadata, identity records,
//!   the offline queue). Each logical collection is a single blob.
//! - [`SecretVault`]: opaque string secrets (tokens, keys). The engine never
//!   persists these anywhere else.

pub mod memory;
pub mod secrets;
pub mod sqlite;

pub use memory::{MemoryKvStore, MemorySecretVault};
pub use secrets::FileSecretVault;
pub use sqlite::SqliteKvStore;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Well-known secret names
pub mod secret_keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const DEVICE_ID: &str = "device_id";
    pub const ACCOUNT_ID: &str = "account_id";
    pub const PRIVATE_KEY: &str = "private_key";
    pub const PUBLIC_KEY: &str = "public_key";
    pub const WRAPPED_KEY_MATERIAL: &str = "wrapped_key_material";
}

/// Errors from the persistence substrates
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable key-value substrate: one named blob per logical collection.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Secure secret storage.
pub trait SecretVault: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>>;
    fn set(&self, name: &str, value: &str) -> Result<()>;
    fn delete(&self, name: &str) -> Result<()>;
}

/// Read a JSON blob, returning `T::default()` when absent.
pub fn load_json<T>(store: &dyn KvStore, key: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match store.get(key)? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => Ok(T::default()),
    }
}

/// Serialize and write a JSON blob.
pub fn save_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set(key, &bytes)
}

pub(crate) fn lock_poisoned(what: &str) -> StorageError {
    StorageError::Backend(format!("{} lock poisoned", what))
}
