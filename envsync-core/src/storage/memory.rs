//! In-memory substrates for tests and ephemeral sessions.

use crate::storage::{lock_poisoned, KvStore, Result, SecretVault};
use std::collections::HashMap;
use std::sync::Mutex;

/// A [`KvStore`] held entirely in memory
#[derive(Default)]
pub struct MemoryKvStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().map_err(|_| lock_poisoned("kv"))?;
        Ok(blobs.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|_| lock_poisoned("kv"))?;
        blobs.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|_| lock_poisoned("kv"))?;
        blobs.remove(key);
        Ok(())
    }
}

/// A [`SecretVault`] held entirely in memory
#[derive(Default)]
pub struct MemorySecretVault {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemorySecretVault {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretVault for MemorySecretVault {
    fn get(&self, name: &str) -> Result<Option<String>> {
        let secrets = self.secrets.lock().map_err(|_| lock_poisoned("secrets"))?;
        Ok(secrets.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        let mut secrets = self.secrets.lock().map_err(|_| lock_poisoned("secrets"))?;
        secrets.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut secrets = self.secrets.lock().map_err(|_| lock_poisoned("secrets"))?;
        secrets.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{load_json, save_json};

    #[test]
    fn kv_set_get_delete() {
        let store = MemoryKvStore::new();
        assert!(store.get("a").unwrap().is_none());

        store.set("a", b"one").unwrap();
        assert_eq!(store.get("a").unwrap().unwrap(), b"one");

        store.delete("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn json_helpers_default_when_missing() {
        let store = MemoryKvStore::new();
        let empty: Vec<String> = load_json(&store, "list").unwrap();
        assert!(empty.is_empty());

        save_json(&store, "list", &vec!["x".to_string()]).unwrap();
        let loaded: Vec<String> = load_json(&store, "list").unwrap();
        assert_eq!(loaded, vec!["x".to_string()]);
    }

    #[test]
    fn secrets_roundtrip() {
        let vault = MemorySecretVault::new();
        vault.set("token", "abc").unwrap();
        assert_eq!(vault.get("token").unwrap().as_deref(), Some("abc"));
        vault.delete("token").unwrap();
        assert!(vault.get("token").unwrap().is_none());
    }
}
