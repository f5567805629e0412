//! File-backed secret vault.
//!
//! Stores secrets as a JSON map in a single file readable only by the
//! owner. Hosts with an OS keychain should provide their own
//! [`SecretVault`] instead.

use crate::storage::{lock_poisoned, Result, SecretVault, StorageError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct FileSecretVault {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileSecretVault {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn write_all(&self, secrets: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(secrets)?)?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

impl SecretVault for FileSecretVault {
    fn get(&self, name: &str) -> Result<Option<String>> {
        let _guard = self.guard.lock().map_err(|_| lock_poisoned("secret file"))?;
        Ok(self.read_all()?.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        let _guard = self.guard.lock().map_err(|_| lock_poisoned("secret file"))?;
        let mut secrets = self.read_all()?;
        secrets.insert(name.to_string(), value.to_string());
        self.write_all(&secrets)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.guard.lock().map_err(|_| lock_poisoned("secret file"))?;
        let mut secrets = self.read_all()?;
        if secrets.remove(name).is_some() {
            self.write_all(&secrets)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_survive_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secrets.json");

        let vault = FileSecretVault::new(&path);
        assert!(vault.get("device_id").unwrap().is_none());
        vault.set("device_id", "dev-1").unwrap();
        vault.set("account_id", "acct-1").unwrap();

        let again = FileSecretVault::new(&path);
        assert_eq!(again.get("device_id").unwrap().as_deref(), Some("dev-1"));

        again.delete("device_id").unwrap();
        assert!(vault.get("device_id").unwrap().is_none());
        assert_eq!(vault.get("account_id").unwrap().as_deref(), Some("acct-1"));
    }

    #[cfg(unix)]
    #[test]
    fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let vault = FileSecretVault::new(dir.path().join("secrets.json"));
        vault.set("private_key", "pem").unwrap();

        let mode = fs::metadata(vault.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
