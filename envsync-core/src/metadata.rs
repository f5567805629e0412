//! Per-file sync metadata with serialized writes.
//!
//! The whole collection is one JSON map (`fileId -> TrackedFile`) in the
//! [`KvStore`]. Reads go straight to the store. Every write is a
//! read-modify-write of that blob, funneled through a single fair async
//! mutex so writes apply strictly in submission order and a background
//! poll can never lose a concurrent local save's update.

use crate::storage::{load_json, save_json, KvStore, StorageError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// KV blob holding the metadata map
pub const METADATA_KEY: &str = "sync_metadata";

type Result<T> = std::result::Result<T, StorageError>;

/// Compute the remote file id for a file within a project.
///
/// `fileId = hex(sha256(projectId + fileName))`
pub fn file_id(project_id: &str, file_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update(file_name.as_bytes());
    hex::encode(hasher.finalize())
}

/// Sync state of one tracked file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedFile {
    pub file_id: String,
    pub file_name: String,
    /// Hash of the content last confirmed identical on both sides
    pub last_synced_hash: String,
    /// Unix timestamp of the last successful push or pull
    pub last_synced_at: i64,
    pub var_count: usize,
}

impl TrackedFile {
    pub fn new(project_id: &str, file_name: &str, content_hash: String, var_count: usize) -> Self {
        Self {
            file_id: file_id(project_id, file_name),
            file_name: file_name.to_string(),
            last_synced_hash: content_hash,
            last_synced_at: chrono::Utc::now().timestamp(),
            var_count,
        }
    }

    /// Whether this record belongs to `project_id` under the id formula
    pub fn belongs_to(&self, project_id: &str) -> bool {
        self.file_id == file_id(project_id, &self.file_name)
    }
}

type MetadataMap = BTreeMap<String, TrackedFile>;

/// Durable sync metadata with a single serialized write path
#[derive(Clone)]
pub struct MetadataStore {
    store: Arc<dyn KvStore>,
    write_lock: Arc<Mutex<()>>,
}

impl MetadataStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn load(&self) -> Result<MetadataMap> {
        load_json(self.store.as_ref(), METADATA_KEY)
    }

    pub fn get(&self, file_id: &str) -> Result<Option<TrackedFile>> {
        Ok(self.load()?.remove(file_id))
    }

    pub fn get_by_file_name(&self, file_name: &str) -> Result<Option<TrackedFile>> {
        Ok(self
            .load()?
            .into_values()
            .find(|record| record.file_name == file_name))
    }

    pub fn get_all(&self) -> Result<Vec<TrackedFile>> {
        Ok(self.load()?.into_values().collect())
    }

    /// Records tracked under `project_id`
    pub fn get_for_project(&self, project_id: &str) -> Result<Vec<TrackedFile>> {
        Ok(self
            .load()?
            .into_values()
            .filter(|record| record.belongs_to(project_id))
            .collect())
    }

    /// Run `f` against the map as one serialized write unit.
    async fn write<T>(&self, f: impl FnOnce(&mut MetadataMap) -> T) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load()?;
        let out = f(&mut map);
        save_json(self.store.as_ref(), METADATA_KEY, &map)?;
        Ok(out)
    }

    pub async fn put(&self, file_id: &str, record: TrackedFile) -> Result<()> {
        debug!(file_id, file_name = %record.file_name, "Saving sync metadata");
        self.write(|map| {
            map.insert(file_id.to_string(), record);
        })
        .await
    }

    /// Remove a record. Returns whether one existed.
    pub async fn delete(&self, file_id: &str) -> Result<bool> {
        self.write(|map| map.remove(file_id).is_some()).await
    }

    /// Re-key every record of `old_project_id` under `new_project_id`.
    ///
    /// Records of other projects are untouched. Running it again with the
    /// same arguments moves nothing: migrated records no longer match the
    /// old formula.
    pub async fn migrate(&self, old_project_id: &str, new_project_id: &str) -> Result<usize> {
        let migrated = self
            .write(|map| {
                let moving: Vec<String> = map
                    .iter()
                    .filter(|(key, record)| {
                        record.belongs_to(old_project_id) && **key == record.file_id
                    })
                    .map(|(key, _)| key.clone())
                    .collect();

                for key in &moving {
                    if let Some(mut record) = map.remove(key) {
                        record.file_id = file_id(new_project_id, &record.file_name);
                        map.insert(record.file_id.clone(), record);
                    }
                }
                moving.len()
            })
            .await?;

        info!(
            old_project_id,
            new_project_id, migrated, "Migrated sync metadata"
        );
        Ok(migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;

    fn store() -> MetadataStore {
        MetadataStore::new(Arc::new(MemoryKvStore::new()))
    }

    fn record(project: &str, name: &str, hash: &str) -> TrackedFile {
        TrackedFile::new(project, name, hash.to_string(), 1)
    }

    #[test]
    fn file_id_is_deterministic() {
        assert_eq!(file_id("proj", ".env"), file_id("proj", ".env"));
        assert_ne!(file_id("proj", ".env"), file_id("proj", ".env.local"));
        assert_ne!(file_id("proj", ".env"), file_id("other", ".env"));
        assert_eq!(file_id("proj", ".env").len(), 64);
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = store();
        let rec = record("p", ".env", "h1");

        store.put(&rec.file_id, rec.clone()).await.unwrap();
        assert_eq!(store.get(&rec.file_id).unwrap(), Some(rec.clone()));
        assert_eq!(store.get_by_file_name(".env").unwrap(), Some(rec.clone()));
        assert_eq!(store.get_all().unwrap().len(), 1);

        assert!(store.delete(&rec.file_id).await.unwrap());
        assert!(!store.delete(&rec.file_id).await.unwrap());
        assert!(store.get(&rec.file_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_writes_to_different_keys_both_land() {
        let store = store();
        let a = record("p", ".env", "ha");
        let b = record("p", ".env.local", "hb");

        let (ra, rb) = tokio::join!(
            store.put(&a.file_id, a.clone()),
            store.put(&b.file_id, b.clone())
        );
        ra.unwrap();
        rb.unwrap();

        assert_eq!(store.get(&a.file_id).unwrap(), Some(a));
        assert_eq!(store.get(&b.file_id).unwrap(), Some(b));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_concurrent_writers_lose_nothing() {
        let store = store();
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let rec = record("p", &format!(".env.{}", i), "h");
                store.put(&rec.file_id.clone(), rec).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.get_all().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn same_key_writes_apply_in_submission_order() {
        let store = store();
        let first = record("p", ".env", "first");
        let second = record("p", ".env", "second");
        let id = first.file_id.clone();

        let (r1, r2) = tokio::join!(store.put(&id, first), store.put(&id, second));
        r1.unwrap();
        r2.unwrap();

        assert_eq!(store.get(&id).unwrap().unwrap().last_synced_hash, "second");
    }

    #[tokio::test]
    async fn migrate_moves_only_old_project_records() {
        let store = store();
        let a = record("old", ".env", "ha");
        let b = record("old", ".env.production", "hb");
        let other = record("unrelated", ".env", "hc");
        for rec in [&a, &b, &other] {
            store.put(&rec.file_id, rec.clone()).await.unwrap();
        }

        let moved = store.migrate("old", "new").await.unwrap();
        assert_eq!(moved, 2);

        assert!(store.get(&a.file_id).unwrap().is_none());
        let migrated = store.get(&file_id("new", ".env")).unwrap().unwrap();
        assert_eq!(migrated.last_synced_hash, "ha");
        assert!(store.get(&file_id("new", ".env.production")).unwrap().is_some());
        assert_eq!(store.get(&other.file_id).unwrap(), Some(other));
        assert_eq!(store.get_for_project("new").unwrap().len(), 2);

        // Re-running is a no-op
        assert_eq!(store.migrate("old", "new").await.unwrap(), 0);
        assert_eq!(store.get_all().unwrap().len(), 3);
    }
}
