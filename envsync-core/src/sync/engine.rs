//! Sync manager: reconciles local edits and remote updates per file.
//!
//! Two triggers exist per tracked file: a local change and a remote poll.
//! Both claim the file in an in-memory lock set before touching the
//! network. Claiming and the checks that decide whether to claim run
//! without any `.await` in between, so no other trigger can slip in and
//! act on a stale decision. A trigger that finds the file claimed is
//! coalesced and replayed by the claim holder once it is done.

use crate::connection::{ConnectionMonitor, ConnectionState};
use crate::crypto::{content_hash, encrypt, SymmetricKey};
use crate::debounce::Debouncer;
use crate::decision::{ConflictChoice, ConflictPrompt, DecisionCallback, MigrationChoice};
use crate::files::{count_vars, ProjectFiles};
use crate::identity::{IdentityResolver, ProjectIdentity};
use crate::metadata::{file_id, MetadataStore, TrackedFile};
use crate::queue::{operation_id, DrainReport, OfflineQueue, OperationType, QueuedOperation};
use crate::remote::{FileUpload, RemoteError, RemoteFile, RemoteFileSummary, RemoteService};
use crate::storage::lock_poisoned;
use crate::sync::config::SyncConfig;
use crate::sync::models::{PollReport, SyncEvent, SyncOutcome, SyncStatus};
use crate::{EnvSyncError, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Collaborators the manager is composed from
pub struct SyncServices {
    pub identity: Arc<IdentityResolver>,
    pub metadata: MetadataStore,
    pub queue: Arc<OfflineQueue>,
    pub connection: Arc<ConnectionMonitor>,
    pub remote: Arc<dyn RemoteService>,
    pub files: Arc<dyn ProjectFiles>,
    pub decisions: Arc<dyn DecisionCallback>,
}

/// Orchestrates sync for one working copy
pub struct SyncManager {
    working_copy: PathBuf,
    config: SyncConfig,
    key: SymmetricKey,
    identity: Arc<IdentityResolver>,
    metadata: MetadataStore,
    queue: Arc<OfflineQueue>,
    connection: Arc<ConnectionMonitor>,
    remote: Arc<dyn RemoteService>,
    files: Arc<dyn ProjectFiles>,
    decisions: Arc<dyn DecisionCallback>,
    /// File ids with a sync in flight
    in_flight: Mutex<HashSet<String>>,
    /// File names whose local change arrived while in flight
    coalesced: Mutex<HashSet<String>>,
    /// Consecutive `NotFound` responses per file id
    not_found: Mutex<HashMap<String, u32>>,
    polling: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

/// Releases a file's claim on drop
struct FileLock<'a> {
    set: &'a Mutex<HashSet<String>>,
    file_id: String,
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.file_id);
        }
    }
}

struct Running<'a>(&'a AtomicBool);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One side of a reconciliation
struct Side {
    bytes: Vec<u8>,
    hash: String,
}

impl Side {
    fn new(bytes: Vec<u8>) -> Self {
        let hash = content_hash(&bytes);
        Self { bytes, hash }
    }
}

impl SyncManager {
    pub fn new(
        working_copy: impl Into<PathBuf>,
        config: SyncConfig,
        key: SymmetricKey,
        services: SyncServices,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            working_copy: working_copy.into(),
            config,
            key,
            identity: services.identity,
            metadata: services.metadata,
            queue: services.queue,
            connection: services.connection,
            remote: services.remote,
            files: services.files,
            decisions: services.decisions,
            in_flight: Mutex::new(HashSet::new()),
            coalesced: Mutex::new(HashSet::new()),
            not_found: Mutex::new(HashMap::new()),
            polling: AtomicBool::new(false),
            events,
        }
    }

    pub fn working_copy(&self) -> &Path {
        &self.working_copy
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn project_id(&self) -> Result<String> {
        let identity = self.identity.resolve(&self.working_copy).await?;
        Ok(identity.effective_id().to_string())
    }

    // -- Lock set and counters --

    fn is_in_flight(&self, file_id: &str) -> Result<bool> {
        let set = self
            .in_flight
            .lock()
            .map_err(|_| lock_poisoned("in-flight set"))?;
        Ok(set.contains(file_id))
    }

    fn try_claim(&self, file_id: &str) -> Result<Option<FileLock<'_>>> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| lock_poisoned("in-flight set"))?;
        if !set.insert(file_id.to_string()) {
            return Ok(None);
        }
        Ok(Some(FileLock {
            set: &self.in_flight,
            file_id: file_id.to_string(),
        }))
    }

    fn stash(&self, file_name: &str) -> Result<SyncOutcome> {
        self.coalesced
            .lock()
            .map_err(|_| lock_poisoned("coalesced set"))?
            .insert(file_name.to_string());
        debug!(file_name, "Sync in flight; coalescing local change");
        Ok(SyncOutcome::Coalesced)
    }

    fn take_coalesced(&self, file_name: &str) -> Result<bool> {
        Ok(self
            .coalesced
            .lock()
            .map_err(|_| lock_poisoned("coalesced set"))?
            .remove(file_name))
    }

    fn bump_not_found(&self, file_id: &str) -> Result<u32> {
        let mut counters = self
            .not_found
            .lock()
            .map_err(|_| lock_poisoned("not-found counters"))?;
        let count = counters.entry(file_id.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    fn clear_not_found(&self, file_id: &str) -> Result<()> {
        self.not_found
            .lock()
            .map_err(|_| lock_poisoned("not-found counters"))?
            .remove(file_id);
        Ok(())
    }

    // -- Payload helpers --

    fn seal(&self, side: &Side) -> Result<FileUpload> {
        Ok(FileUpload {
            payload: encrypt(&side.bytes, &self.key)?,
            content_hash: side.hash.clone(),
            var_count: count_vars(&side.bytes),
        })
    }

    fn open(&self, file: &RemoteFile) -> Result<Side> {
        Ok(Side::new(file.payload.open(&self.key)?))
    }

    fn check_size(&self, file_name: &str, bytes: &[u8]) -> Result<()> {
        let size = bytes.len() as u64;
        if size > self.config.max_file_size {
            warn!(file_name, size, "File over size limit; not syncing");
            return Err(EnvSyncError::CapacityExceeded {
                file_name: file_name.to_string(),
                size,
                limit: self.config.max_file_size,
            });
        }
        Ok(())
    }

    async fn record_synced(&self, project_id: &str, file_name: &str, side: &Side) -> Result<()> {
        let record = TrackedFile::new(
            project_id,
            file_name,
            side.hash.clone(),
            count_vars(&side.bytes),
        );
        self.metadata.put(&record.file_id.clone(), record).await?;
        Ok(())
    }

    // -- Local-change path --

    /// Handle a change to a local file.
    ///
    /// While offline the push is queued. While the file is in flight the
    /// change is coalesced; the in-flight sync replays it afterwards.
    ///
    /// A failed attempt does not strand a coalesced change: the newer
    /// change is replayed and its result is returned instead.
    pub async fn on_local_change(&self, file_name: &str) -> Result<SyncOutcome> {
        let mut outcome = self.local_change_once(file_name).await;
        while !matches!(outcome, Ok(SyncOutcome::Coalesced)) && self.take_coalesced(file_name)? {
            if let Err(e) = &outcome {
                warn!(file_name, error = %e, "Sync failed; replaying newer local change");
            }
            debug!(file_name, "Replaying coalesced local change");
            outcome = self.local_change_once(file_name).await;
        }
        outcome
    }

    async fn local_change_once(&self, file_name: &str) -> Result<SyncOutcome> {
        let project_id = self.project_id().await?;
        let id = file_id(&project_id, file_name);

        if !self.connection.is_reachable() {
            if self.metadata.get(&id)?.is_none() {
                return Ok(SyncOutcome::Untracked);
            }
            return self.defer(OperationType::Push, &id, file_name);
        }
        if self.is_in_flight(&id)? {
            return self.stash(file_name);
        }

        let contents = self.files.read(file_name).await?;

        // Check and claim: no suspension point until the lock is held
        let Some(record) = self.metadata.get(&id)? else {
            return Ok(SyncOutcome::Untracked);
        };
        if self.is_in_flight(&id)? {
            return self.stash(file_name);
        }
        let local = match contents {
            Some(bytes) => {
                let side = Side::new(bytes);
                if side.hash == record.last_synced_hash {
                    return Ok(SyncOutcome::Unchanged);
                }
                self.check_size(file_name, &side.bytes)?;
                Some(side)
            }
            None => None,
        };
        let Some(_lock) = self.try_claim(&id)? else {
            return self.stash(file_name);
        };

        match local {
            Some(side) => self.push_tracked(&project_id, &record, side).await,
            None => self.drop_ghost(&record).await,
        }
    }

    async fn push_tracked(
        &self,
        project_id: &str,
        record: &TrackedFile,
        local: Side,
    ) -> Result<SyncOutcome> {
        let upload = self.seal(&local)?;
        let result = self
            .remote
            .update_file(&record.file_id, &upload, Some(&record.last_synced_hash))
            .await;

        match result {
            Ok(()) => {
                self.record_synced(project_id, &record.file_name, &local).await?;
                self.clear_not_found(&record.file_id)?;
                info!(file_name = %record.file_name, "Pushed local changes");
                self.emit(SyncEvent::Pushed {
                    file_name: record.file_name.clone(),
                });
                Ok(SyncOutcome::Pushed)
            }
            Err(RemoteError::PreconditionFailed(_)) => {
                info!(file_name = %record.file_name, "Remote changed concurrently");
                self.resolve_with_remote(project_id, record, local).await
            }
            Err(RemoteError::NotFound(_)) => self.recover_missing(project_id, record, local).await,
            Err(e) if e.is_transient() => {
                warn!(file_name = %record.file_name, error = %e, "Push failed; queuing for later");
                self.defer(OperationType::Push, &record.file_id, &record.file_name)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch the remote side of a conflict and ask for a decision.
    async fn resolve_with_remote(
        &self,
        project_id: &str,
        record: &TrackedFile,
        local: Side,
    ) -> Result<SyncOutcome> {
        let remote = match self.remote.get_file(&record.file_id).await {
            Ok(file) => self.open(&file)?,
            Err(RemoteError::NotFound(_)) => {
                return self.recover_missing(project_id, record, local).await
            }
            Err(e) => return Err(e.into()),
        };
        self.decide_conflict(
            project_id,
            &record.file_name,
            &record.last_synced_hash,
            local,
            remote,
        )
        .await
    }

    /// Surface a both-sides-changed conflict and apply the answer.
    ///
    /// Neither side is written before the decision returns.
    async fn decide_conflict(
        &self,
        project_id: &str,
        file_name: &str,
        base_hash: &str,
        local: Side,
        remote: Side,
    ) -> Result<SyncOutcome> {
        if local.hash == remote.hash {
            self.record_synced(project_id, file_name, &local).await?;
            return Ok(SyncOutcome::Unchanged);
        }

        let prompt = ConflictPrompt {
            file_name: file_name.to_string(),
            local_hash: local.hash.clone(),
            remote_hash: remote.hash.clone(),
            base_hash: base_hash.to_string(),
            local_var_count: count_vars(&local.bytes),
            remote_var_count: count_vars(&remote.bytes),
        };
        warn!(file_name, "Local and remote both changed; asking for a decision");
        let choice = self.decisions.resolve_conflict(prompt).await;

        match choice {
            ConflictChoice::UseLocal => {
                let upload = self.seal(&local)?;
                let id = file_id(project_id, file_name);
                self.remote
                    .update_file(&id, &upload, Some(&remote.hash))
                    .await?;
                self.record_synced(project_id, file_name, &local).await?;
                self.clear_not_found(&id)?;
            }
            ConflictChoice::UseRemote => {
                self.files.write(file_name, &remote.bytes).await?;
                self.record_synced(project_id, file_name, &remote).await?;
            }
            ConflictChoice::Cancel => {
                info!(file_name, "Conflict left unresolved");
            }
        }

        self.emit(SyncEvent::Conflict {
            file_name: file_name.to_string(),
            choice,
        });
        Ok(SyncOutcome::Conflict(choice))
    }

    /// Bounded auto-recovery for a remote record that went missing.
    ///
    /// Local metadata is cleared every time. Below the threshold the file
    /// is re-registered; at the threshold recovery stops for good and the
    /// file stays untracked until re-initialized explicitly. If the
    /// re-registration itself fails transiently, the record is restored
    /// and a push is queued so the next attempt happens on reconnect.
    async fn recover_missing(
        &self,
        project_id: &str,
        record: &TrackedFile,
        local: Side,
    ) -> Result<SyncOutcome> {
        let attempts = self.bump_not_found(&record.file_id)?;
        self.metadata.delete(&record.file_id).await?;

        if attempts >= self.config.not_found_threshold {
            warn!(
                file_name = %record.file_name,
                attempts,
                "Remote copy keeps disappearing; auto-recovery stopped"
            );
            self.emit(SyncEvent::RecoveryExhausted {
                file_name: record.file_name.clone(),
                attempts,
            });
            return Err(EnvSyncError::RecoveryExhausted {
                file_name: record.file_name.clone(),
                attempts,
            });
        }

        info!(file_name = %record.file_name, attempt = attempts, "Remote copy missing; re-creating it");
        self.emit(SyncEvent::RecoveryAttempted {
            file_name: record.file_name.clone(),
            attempt: attempts,
        });
        match self.register(project_id, &record.file_name, &local).await {
            Ok(()) => Ok(SyncOutcome::Recreated),
            Err(EnvSyncError::Remote(e)) if e.is_transient() => {
                warn!(
                    file_name = %record.file_name,
                    error = %e,
                    "Re-creating remote copy failed; will retry"
                );
                self.metadata.put(&record.file_id, record.clone()).await?;
                self.defer(OperationType::Push, &record.file_id, &record.file_name)
            }
            Err(e) => Err(e),
        }
    }

    /// Create the remote project if needed, upload, and start tracking.
    async fn register(&self, project_id: &str, file_name: &str, local: &Side) -> Result<()> {
        if !self.remote.check_project_exists(project_id).await? {
            info!(project_id, "Creating remote project");
            self.remote.create_project(project_id).await?;
        }
        let upload = self.seal(local)?;
        self.remote
            .create_file(project_id, file_name, &upload)
            .await?;
        self.record_synced(project_id, file_name, local).await?;
        self.emit(SyncEvent::Pushed {
            file_name: file_name.to_string(),
        });
        Ok(())
    }

    async fn drop_ghost(&self, record: &TrackedFile) -> Result<SyncOutcome> {
        self.metadata.delete(&record.file_id).await?;
        warn!(file_name = %record.file_name, "Tracked file no longer exists locally; stopped tracking");
        self.emit(SyncEvent::GhostDetected {
            file_name: record.file_name.clone(),
        });
        Ok(SyncOutcome::Ghost)
    }

    fn defer(&self, op_type: OperationType, entity_id: &str, file_name: &str) -> Result<SyncOutcome> {
        let op = QueuedOperation::new(op_type, entity_id, file_name);
        let op_id = op.id.clone();
        if let Some(dropped) = self.queue.enqueue(op)? {
            if dropped.id == op_id {
                warn!(file_name, "Offline queue full of higher-priority work; not queued");
                return Ok(SyncOutcome::Skipped);
            }
            warn!(evicted = %dropped.id, "Offline queue full; evicted an operation");
        }
        self.emit(SyncEvent::Queued {
            file_name: file_name.to_string(),
            op_type,
        });
        Ok(SyncOutcome::Queued)
    }

    // -- Remote-poll path --

    /// Check every tracked file against the remote once.
    ///
    /// Returns `None` when offline or when a poll is already running.
    pub async fn poll(&self) -> Result<Option<PollReport>> {
        if !self.connection.is_reachable() {
            debug!("Offline; skipping poll");
            return Ok(None);
        }
        if self
            .polling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Poll already running");
            return Ok(None);
        }
        let _running = Running(&self.polling);

        let project_id = self.project_id().await?;
        let mut report = PollReport::default();

        for record in self.metadata.get_for_project(&project_id)? {
            match self.poll_file(&project_id, &record.file_id).await {
                Ok(outcome) => report.record(outcome),
                Err(EnvSyncError::Remote(e)) if e.is_transient() => {
                    warn!(error = %e, "Remote unreachable; ending poll early");
                    report.failed += 1;
                    break;
                }
                Err(e) => {
                    warn!(file_name = %record.file_name, error = %e, "Poll failed for file");
                    report.failed += 1;
                }
            }
            self.replay_coalesced(&record.file_name).await;
        }

        debug!(?report, "Poll finished");
        Ok(Some(report))
    }

    async fn poll_file(&self, project_id: &str, id: &str) -> Result<SyncOutcome> {
        let Some(_lock) = self.try_claim(id)? else {
            return Ok(SyncOutcome::Skipped);
        };
        // Re-read under the lock; a local push may have just updated it
        let Some(record) = self.metadata.get(id)? else {
            return Ok(SyncOutcome::Untracked);
        };
        self.pull_tracked(project_id, &record).await
    }

    async fn pull_tracked(&self, project_id: &str, record: &TrackedFile) -> Result<SyncOutcome> {
        let Some(bytes) = self.files.read(&record.file_name).await? else {
            return self.drop_ghost(record).await;
        };
        let local = Side::new(bytes);

        let remote = match self.remote.get_file(&record.file_id).await {
            Ok(file) => self.open(&file)?,
            Err(RemoteError::NotFound(_)) => {
                return self.recover_missing(project_id, record, local).await
            }
            Err(e) => return Err(e.into()),
        };

        if remote.hash == record.last_synced_hash {
            return Ok(SyncOutcome::Unchanged);
        }

        if local.hash == record.last_synced_hash {
            self.files.write(&record.file_name, &remote.bytes).await?;
            self.record_synced(project_id, &record.file_name, &remote).await?;
            info!(file_name = %record.file_name, "Pulled remote changes");
            self.emit(SyncEvent::Pulled {
                file_name: record.file_name.clone(),
            });
            return Ok(SyncOutcome::Pulled);
        }

        self.decide_conflict(
            project_id,
            &record.file_name,
            &record.last_synced_hash,
            local,
            remote,
        )
        .await
    }

    async fn replay_coalesced(&self, file_name: &str) {
        match self.take_coalesced(file_name) {
            Ok(true) => {
                if let Err(e) = self.on_local_change(file_name).await {
                    warn!(file_name, error = %e, "Coalesced local change failed");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Could not check coalesced changes"),
        }
    }

    // -- Caller-initiated operations --

    /// Push a file now. Untracked files are initialized.
    pub async fn push_file(&self, file_name: &str) -> Result<SyncOutcome> {
        let project_id = self.project_id().await?;
        if self.metadata.get(&file_id(&project_id, file_name))?.is_none() {
            return self.initialize_file(file_name).await;
        }
        self.on_local_change(file_name).await
    }

    /// Pull a file now. Untracked files are restored from the remote.
    pub async fn pull_file(&self, file_name: &str) -> Result<SyncOutcome> {
        let project_id = self.project_id().await?;
        let id = file_id(&project_id, file_name);
        if self.metadata.get(&id)?.is_none() {
            return self.restore_file(file_name).await;
        }

        let outcome = self.poll_file(&project_id, &id).await?;
        self.replay_coalesced(file_name).await;
        Ok(outcome)
    }

    /// Start tracking a local file and upload it.
    ///
    /// Also the explicit re-initialization after exhausted auto-recovery.
    /// If another device already uploaded the file, differing contents are
    /// a conflict.
    pub async fn initialize_file(&self, file_name: &str) -> Result<SyncOutcome> {
        let project_id = self.project_id().await?;
        let id = file_id(&project_id, file_name);

        let Some(bytes) = self.files.read(file_name).await? else {
            return Err(EnvSyncError::InvalidInput(format!(
                "{} does not exist in the working copy",
                file_name
            )));
        };
        self.check_size(file_name, &bytes)?;
        let local = Side::new(bytes);

        let Some(lock) = self.try_claim(&id)? else {
            return self.stash(file_name);
        };
        let outcome = self.initialize_claimed(&project_id, &id, file_name, local).await;
        drop(lock);

        self.replay_coalesced(file_name).await;
        outcome
    }

    async fn initialize_claimed(
        &self,
        project_id: &str,
        id: &str,
        file_name: &str,
        local: Side,
    ) -> Result<SyncOutcome> {
        self.clear_not_found(id)?;

        match self.remote.get_file(id).await {
            Ok(file) => {
                let remote = self.open(&file)?;
                self.decide_conflict(project_id, file_name, "", local, remote)
                    .await
            }
            Err(RemoteError::NotFound(_)) => {
                self.register(project_id, file_name, &local).await?;
                info!(file_name, "Initialized file");
                Ok(SyncOutcome::Pushed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Pull a remote-only file into the working copy and start tracking it.
    pub async fn restore_file(&self, file_name: &str) -> Result<SyncOutcome> {
        let project_id = self.project_id().await?;
        let id = file_id(&project_id, file_name);

        let Some(lock) = self.try_claim(&id)? else {
            return Ok(SyncOutcome::Skipped);
        };
        let outcome = self.restore_claimed(&project_id, &id, file_name).await;
        drop(lock);

        self.replay_coalesced(file_name).await;
        outcome
    }

    async fn restore_claimed(&self, project_id: &str, id: &str, file_name: &str) -> Result<SyncOutcome> {
        let remote = self.open(&self.remote.get_file(id).await?)?;

        match self.files.read(file_name).await? {
            Some(bytes) => {
                self.decide_conflict(project_id, file_name, "", Side::new(bytes), remote)
                    .await
            }
            None => {
                self.files.write(file_name, &remote.bytes).await?;
                self.record_synced(project_id, file_name, &remote).await?;
                info!(file_name, "Restored file from remote");
                self.emit(SyncEvent::Pulled {
                    file_name: file_name.to_string(),
                });
                Ok(SyncOutcome::Pulled)
            }
        }
    }

    /// Stop tracking a file, optionally deleting the remote copy too.
    pub async fn untrack_file(&self, file_name: &str, delete_remote: bool) -> Result<bool> {
        let project_id = self.project_id().await?;
        let id = file_id(&project_id, file_name);

        let existed = self.metadata.delete(&id).await?;
        self.clear_not_found(&id)?;
        self.queue.remove(&operation_id(OperationType::Push, &id))?;
        self.queue.remove(&operation_id(OperationType::Pull, &id))?;

        if delete_remote {
            if !self.connection.is_reachable() {
                self.defer(OperationType::Metadata, &id, file_name)?;
            } else {
                match self.remote.delete_file(&id).await {
                    Ok(()) | Err(RemoteError::NotFound(_)) => {}
                    Err(e) if e.is_transient() => {
                        self.defer(OperationType::Metadata, &id, file_name)?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        } else if !existed {
            return Err(EnvSyncError::NotTracked(file_name.to_string()));
        }

        info!(file_name, delete_remote, "Stopped tracking file");
        Ok(existed)
    }

    /// Manual re-initialization: forget local state and register again.
    pub async fn reinitialize_file(&self, file_name: &str) -> Result<SyncOutcome> {
        let project_id = self.project_id().await?;
        let id = file_id(&project_id, file_name);
        self.clear_not_found(&id)?;
        self.metadata.delete(&id).await?;
        self.initialize_file(file_name).await
    }

    /// Files tracked under the current project id
    pub async fn tracked_files(&self) -> Result<Vec<TrackedFile>> {
        let project_id = self.project_id().await?;
        Ok(self.metadata.get_for_project(&project_id)?)
    }

    /// Candidate files in the working copy that are not yet tracked
    pub async fn untracked_candidates(&self) -> Result<Vec<String>> {
        let project_id = self.project_id().await?;
        let mut untracked = Vec::new();
        for name in self.files.list_candidates().await? {
            if self.metadata.get(&file_id(&project_id, &name))?.is_none() {
                untracked.push(name);
            }
        }
        Ok(untracked)
    }

    pub async fn remote_files(&self) -> Result<Vec<RemoteFileSummary>> {
        let project_id = self.project_id().await?;
        Ok(self.remote.get_files(&project_id).await?)
    }

    // -- Identity --

    /// Resolve identity, asking whether to migrate if it drifted.
    pub async fn check_identity(&self) -> Result<ProjectIdentity> {
        let identity = self.identity.resolve(&self.working_copy).await?;
        let Some(proposal) = identity
            .suggested_migration
            .clone()
            .filter(|_| identity.requires_migration)
        else {
            return Ok(identity);
        };

        self.emit(SyncEvent::MigrationProposed {
            proposal: proposal.clone(),
        });
        match self.decisions.confirm_migration(proposal.clone()).await {
            MigrationChoice::Migrate => {
                let moved = self
                    .identity
                    .apply_migration(
                        &self.working_copy,
                        &identity,
                        &self.metadata,
                        self.remote.as_ref(),
                    )
                    .await?;
                self.emit(SyncEvent::Migrated {
                    old_id: proposal.old_id,
                    new_id: proposal.new_id,
                    moved,
                });
                self.identity.resolve(&self.working_copy).await
            }
            MigrationChoice::Keep => {
                self.identity
                    .keep_identity(&self.working_copy, &identity)
                    .await?;
                self.identity.resolve(&self.working_copy).await
            }
            MigrationChoice::Later => {
                debug!("Migration deferred");
                Ok(identity)
            }
        }
    }

    // -- Offline queue --

    /// Replay queued operations. Returns `None` when offline or when a
    /// drain is already running.
    pub async fn process_offline_queue(&self) -> Result<Option<DrainReport>> {
        if !self.connection.is_reachable() {
            debug!("Offline; not draining queue");
            return Ok(None);
        }
        let report = self.queue.drain(|op| self.replay(op)).await?;
        if let Some(report) = &report {
            self.emit(SyncEvent::QueueDrained {
                succeeded: report.succeeded,
                remaining: report.remaining,
            });
        }
        Ok(report)
    }

    /// Run one queued operation. `true` removes it from the queue.
    async fn replay(&self, op: QueuedOperation) -> bool {
        let result = match op.op_type {
            OperationType::Push => self.on_local_change(&op.file_name).await,
            OperationType::Pull => self.pull_file(&op.file_name).await,
            OperationType::Metadata => match self.remote.delete_file(&op.entity_id).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => Ok(SyncOutcome::Unchanged),
                Err(e) => Err(e.into()),
            },
        };

        match result {
            Ok(SyncOutcome::Queued) | Ok(SyncOutcome::Skipped) => false,
            Ok(_) => true,
            Err(EnvSyncError::Remote(e)) if e.is_transient() => false,
            Err(e) => {
                warn!(op = %op.id, error = %e, "Dropping queued operation that cannot succeed");
                true
            }
        }
    }

    // -- Status and run loop --

    pub async fn status(&self) -> Result<SyncStatus> {
        let identity = self.identity.resolve(&self.working_copy).await?;
        let project_id = identity.effective_id().to_string();
        Ok(SyncStatus {
            tracked_files: self.metadata.get_for_project(&project_id)?.len(),
            project_id,
            identity_source: identity.source,
            migration_pending: identity.requires_migration,
            queued_operations: self.queue.len(),
            connection: self.connection.state(),
            last_good: self.connection.last_good(),
        })
    }

    async fn on_connectivity(&self, state: ConnectionState) {
        info!(state = %state, "Connectivity changed");
        self.emit(SyncEvent::Connectivity { state });
        if state != ConnectionState::Online {
            return;
        }
        if let Err(e) = self.process_offline_queue().await {
            warn!(error = %e, "Offline queue replay failed");
        }
    }

    /// Drive the manager until cancelled.
    ///
    /// `changes` carries names of locally changed files; bursts are
    /// coalesced over the configured quiet period before syncing.
    pub async fn run(self: Arc<Self>, mut changes: mpsc::Receiver<String>, cancel: CancellationToken) {
        info!(working_copy = %self.working_copy.display(), "Sync manager started");
        if let Err(e) = self.check_identity().await {
            warn!(error = %e, "Identity check failed");
        }

        let mut debouncer = Debouncer::new(self.config.local_change_quiet_period());
        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut states = self.connection.subscribe();
        let mut changes_open = true;
        let mut states_open = true;

        loop {
            let flush_at = debouncer.next_deadline();
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.recv(), if changes_open => match change {
                    Some(name) => debouncer.push(name, Instant::now()),
                    None => changes_open = false,
                },
                _ = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    for name in debouncer.drain_ready(Instant::now()) {
                        if let Err(e) = self.on_local_change(&name).await {
                            warn!(file_name = %name, error = %e, "Local change sync failed");
                        }
                    }
                }
                _ = poll.tick() => {
                    if let Err(e) = self.poll().await {
                        warn!(error = %e, "Poll failed");
                    }
                }
                state = states.recv(), if states_open => match state {
                    Ok(state) => self.on_connectivity(state).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Missed connectivity updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => states_open = false,
                },
            }
        }

        debouncer.clear();
        info!("Sync manager stopped");
    }
}
