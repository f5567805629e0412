//! Persisted per-working-copy identity state.

use crate::storage::{load_json, save_json, KvStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// KV blob holding every working copy's record
pub const IDENTITY_KEY: &str = "identity_records";

type Result<T> = std::result::Result<T, StorageError>;

/// A remote URL seen for a working copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObservation {
    pub url: String,
    pub normalized: String,
    pub detected_at: i64,
}

/// An applied identity migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationEntry {
    pub from_id: String,
    pub to_id: String,
    pub migrated_at: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentityRecord {
    pub manual_identity: Option<String>,
    pub remote_history: Vec<RemoteObservation>,
    pub sub_project_path: Option<String>,
    pub sub_project_candidates: Vec<String>,
    pub migrations: Vec<MigrationEntry>,
    pub last_active_id: Option<String>,
}

impl IdentityRecord {
    /// Most recently observed remote
    pub fn latest_remote(&self) -> Option<&RemoteObservation> {
        self.remote_history.last()
    }

    /// Append `url` unless it is already the latest observation.
    /// Returns whether anything changed.
    pub fn observe_remote(&mut self, url: &str, normalized: &str) -> bool {
        if self
            .latest_remote()
            .is_some_and(|latest| latest.normalized == normalized)
        {
            return false;
        }
        self.remote_history.push(RemoteObservation {
            url: url.to_string(),
            normalized: normalized.to_string(),
            detected_at: chrono::Utc::now().timestamp(),
        });
        true
    }
}

/// All identity records, keyed by working-copy path
#[derive(Clone)]
pub struct IdentityStore {
    store: Arc<dyn KvStore>,
    write_lock: Arc<Mutex<()>>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn load(&self) -> Result<BTreeMap<String, IdentityRecord>> {
        load_json(self.store.as_ref(), IDENTITY_KEY)
    }

    /// The record for `key`, or `None` if nothing was ever written.
    pub fn get(&self, key: &str) -> Result<Option<IdentityRecord>> {
        Ok(self.load()?.remove(key))
    }

    /// Apply `f` to the record for `key`, creating it on first write.
    pub async fn update<T>(&self, key: &str, f: impl FnOnce(&mut IdentityRecord) -> T) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load()?;
        let out = f(records.entry(key.to_string()).or_default());
        save_json(self.store.as_ref(), IDENTITY_KEY, &records)?;
        Ok(out)
    }

    /// Delete the record for `key`. Returns whether one existed.
    pub async fn reset(&self, key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load()?;
        let existed = records.remove(key).is_some();
        if existed {
            save_json(self.store.as_ref(), IDENTITY_KEY, &records)?;
        }
        Ok(existed)
    }
}
