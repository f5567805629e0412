//! In-process remote service for tests.

use crate::metadata::file_id;
use crate::remote::models::{FileUpload, RemoteFile, RemoteFileSummary};
use crate::remote::{RemoteError, RemoteService, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct State {
    projects: HashSet<String>,
    files: HashMap<String, RemoteFile>,
}

/// Remote double with precondition semantics and fault injection
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
    unhealthy: AtomicBool,
    force_update_not_found: AtomicBool,
    fail_creates: AtomicBool,
    hold_updates: AtomicBool,
    update_started: Notify,
    release_update: Notify,
    calls: AtomicUsize,
    updates: AtomicUsize,
    creates: AtomicUsize,
    file_fetches: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    /// Make every `update_file` answer `NotFound`
    pub fn set_update_not_found(&self, enabled: bool) {
        self.force_update_not_found.store(enabled, Ordering::SeqCst);
    }

    /// Make every `create_file` fail as if the connection dropped
    pub fn set_create_failing(&self, failing: bool) {
        self.fail_creates.store(failing, Ordering::SeqCst);
    }

    /// Park `update_file` calls until [`FakeRemote::release_updates`]
    pub fn hold_updates(&self) {
        self.hold_updates.store(true, Ordering::SeqCst);
    }

    pub fn release_updates(&self) {
        self.hold_updates.store(false, Ordering::SeqCst);
        self.release_update.notify_waiters();
        self.release_update.notify_one();
    }

    /// Resolves once an `update_file` call has been parked
    pub async fn update_parked(&self) {
        self.update_started.notified().await;
    }

    /// Write a file as another device would
    pub fn put_external(&self, project_id: &str, file_name: &str, upload: &FileUpload) {
        let mut state = self.state.lock().unwrap();
        state.projects.insert(project_id.to_string());
        let id = file_id(project_id, file_name);
        state
            .files
            .insert(id.clone(), record(&id, project_id, file_name, upload));
    }

    /// Drop a file as if deleted elsewhere
    pub fn remove_external(&self, file_id: &str) {
        self.state.lock().unwrap().files.remove(file_id);
    }

    pub fn stored(&self, file_id: &str) -> Option<RemoteFile> {
        self.state.lock().unwrap().files.get(file_id).cloned()
    }

    pub fn has_project(&self, project_id: &str) -> bool {
        self.state.lock().unwrap().projects.contains(project_id)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn file_fetches(&self) -> usize {
        self.file_fetches.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(RemoteError::Transient("connection refused".to_string()));
        }
        Ok(())
    }
}

fn record(id: &str, project_id: &str, file_name: &str, upload: &FileUpload) -> RemoteFile {
    RemoteFile {
        file_id: id.to_string(),
        project_id: project_id.to_string(),
        file_name: file_name.to_string(),
        payload: upload.payload.clone(),
        content_hash: upload.content_hash.clone(),
        var_count: upload.var_count,
        updated_at: chrono::Utc::now().timestamp(),
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn check_project_exists(&self, project_id: &str) -> Result<bool> {
        self.enter()?;
        Ok(self.has_project(project_id))
    }

    async fn create_project(&self, project_id: &str) -> Result<()> {
        self.enter()?;
        self.state
            .lock()
            .unwrap()
            .projects
            .insert(project_id.to_string());
        Ok(())
    }

    async fn get_files(&self, project_id: &str) -> Result<Vec<RemoteFileSummary>> {
        self.enter()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .values()
            .filter(|f| f.project_id == project_id)
            .map(RemoteFileSummary::from)
            .collect())
    }

    async fn get_file(&self, file_id: &str) -> Result<RemoteFile> {
        self.enter()?;
        self.file_fetches.fetch_add(1, Ordering::SeqCst);
        self.stored(file_id)
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))
    }

    async fn create_file(
        &self,
        project_id: &str,
        file_name: &str,
        upload: &FileUpload,
    ) -> Result<()> {
        self.enter()?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(RemoteError::Transient("connection reset".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if !state.projects.contains(project_id) {
            return Err(RemoteError::NotFound(project_id.to_string()));
        }
        let id = file_id(project_id, file_name);
        state
            .files
            .insert(id.clone(), record(&id, project_id, file_name, upload));
        Ok(())
    }

    async fn update_file(
        &self,
        file_id: &str,
        upload: &FileUpload,
        base_hash: Option<&str>,
    ) -> Result<()> {
        self.enter()?;
        self.updates.fetch_add(1, Ordering::SeqCst);

        if self.hold_updates.load(Ordering::SeqCst) {
            let released = self.release_update.notified();
            self.update_started.notify_one();
            released.await;
        }

        if self.force_update_not_found.load(Ordering::SeqCst) {
            return Err(RemoteError::NotFound(file_id.to_string()));
        }

        let mut state = self.state.lock().unwrap();
        let existing = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))?;

        if let Some(base) = base_hash {
            if existing.content_hash != base {
                return Err(RemoteError::PreconditionFailed(format!(
                    "expected {}, found {}",
                    base, existing.content_hash
                )));
            }
        }

        existing.payload = upload.payload.clone();
        existing.content_hash = upload.content_hash.clone();
        existing.var_count = upload.var_count;
        existing.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.enter()?;
        self.state
            .lock()
            .unwrap()
            .files
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))
    }

    async fn migrate_project(
        &self,
        old_id: &str,
        new_id: &str,
        _remote_url: Option<&str>,
    ) -> Result<()> {
        self.enter()?;
        let mut state = self.state.lock().unwrap();
        if !state.projects.remove(old_id) {
            return Err(RemoteError::NotFound(old_id.to_string()));
        }
        state.projects.insert(new_id.to_string());

        let moving: Vec<RemoteFile> = state
            .files
            .values()
            .filter(|f| f.project_id == old_id)
            .cloned()
            .collect();
        for mut file in moving {
            state.files.remove(&file.file_id);
            file.file_id = crate::metadata::file_id(new_id, &file.file_name);
            file.project_id = new_id.to_string();
            state.files.insert(file.file_id.clone(), file);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.enter()
    }
}
