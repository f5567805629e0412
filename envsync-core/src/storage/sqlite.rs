//! SQLite-backed key-value substrate.

use crate::storage::{lock_poisoned, KvStore, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Current schema version. Incremented when the schema changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// A [`KvStore`] persisted in a single SQLite table
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    /// Open (and initialize if needed) a store at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Create a new in-memory store for testing
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| lock_poisoned("sqlite"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_blobs (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS kv_schema (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );",
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO kv_schema (id, version) VALUES (1, ?1)",
            [CURRENT_SCHEMA_VERSION],
        )?;
        Ok(())
    }

    /// Schema version recorded in the database
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.conn.lock().map_err(|_| lock_poisoned("sqlite"))?;
        Ok(conn.query_row("SELECT version FROM kv_schema WHERE id = 1", [], |row| {
            row.get(0)
        })?)
    }
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().map_err(|_| lock_poisoned("sqlite"))?;
        Ok(conn
            .query_row("SELECT value FROM kv_blobs WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| lock_poisoned("sqlite"))?;
        conn.execute(
            "INSERT INTO kv_blobs (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            rusqlite::params![key, value, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| lock_poisoned("sqlite"))?;
        conn.execute("DELETE FROM kv_blobs WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_roundtrip() {
        let store = SqliteKvStore::in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        assert!(store.get("metadata").unwrap().is_none());

        store.set("metadata", b"{}").unwrap();
        store.set("metadata", b"{\"a\":1}").unwrap();
        assert_eq!(store.get("metadata").unwrap().unwrap(), b"{\"a\":1}");

        store.delete("metadata").unwrap();
        assert!(store.get("metadata").unwrap().is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envsync.db");

        {
            let store = SqliteKvStore::open(&path).unwrap();
            store.set("queue", b"[1,2,3]").unwrap();
        }

        let reopened = SqliteKvStore::open(&path).unwrap();
        assert_eq!(reopened.get("queue").unwrap().unwrap(), b"[1,2,3]");
    }
}
