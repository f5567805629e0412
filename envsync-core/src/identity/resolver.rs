//! Identity resolution, migration detection and identity operations.

use super::normalize::{identity_hash, normalize_remote_url};
use super::record::{IdentityRecord, IdentityStore, MigrationEntry};
use super::signature;
use super::vcs::{preferred_remote, VcsRemote, VcsRemoteLookup};
use super::{IdentitySource, ProjectIdentity};
use crate::decision::MigrationProposal;
use crate::metadata::MetadataStore;
use crate::remote::{RemoteError, RemoteService};
use crate::storage::KvStore;
use crate::{EnvSyncError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MONOREPO_SCAN_DEPTH: usize = 3;

/// Stable key for a working copy's identity record
pub fn working_copy_key(working_copy: &Path) -> String {
    std::fs::canonicalize(working_copy)
        .unwrap_or_else(|_| working_copy.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// Resolves working copies to project identities
pub struct IdentityResolver {
    records: IdentityStore,
    vcs: Arc<dyn VcsRemoteLookup>,
}

struct Candidate {
    source: IdentitySource,
    input: String,
    remote_url: Option<String>,
    live: Option<VcsRemote>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn KvStore>, vcs: Arc<dyn VcsRemoteLookup>) -> Self {
        Self {
            records: IdentityStore::new(store),
            vcs,
        }
    }

    /// The persisted record, if one was ever written
    pub fn record(&self, working_copy: &Path) -> Result<Option<IdentityRecord>> {
        Ok(self.records.get(&working_copy_key(working_copy))?)
    }

    /// Compute the working copy's identity.
    ///
    /// Records newly seen remotes, monorepo sub-project candidates and,
    /// on first resolution, the active id. A drift from the recorded
    /// active id is reported as a pending migration.
    pub async fn resolve(&self, working_copy: &Path) -> Result<ProjectIdentity> {
        let key = working_copy_key(working_copy);
        let record = self.records.get(&key)?.unwrap_or_default();
        let sub_path = record.sub_project_path.clone();

        let candidate = self.candidate(working_copy, &record);
        let id = identity_hash(&candidate.input, sub_path.as_deref());

        let pending = record
            .last_active_id
            .as_ref()
            .filter(|last| **last != id)
            .map(|last| MigrationProposal {
                old_id: last.clone(),
                new_id: id.clone(),
                reason: migration_reason(&candidate, &record),
            });

        let sub_projects = sub_project_candidates(working_copy);
        let needs_write = record.last_active_id.is_none()
            || record.sub_project_candidates != sub_projects
            || candidate.live.as_ref().is_some_and(|live| {
                record
                    .latest_remote()
                    .map_or(true, |latest| latest.normalized != normalize_remote_url(&live.url))
            });

        if needs_write {
            let live = candidate.live.clone();
            let first_id = id.clone();
            self.records
                .update(&key, move |r| {
                    if let Some(remote) = &live {
                        r.observe_remote(&remote.url, &normalize_remote_url(&remote.url));
                    }
                    r.sub_project_candidates = sub_projects;
                    if r.last_active_id.is_none() {
                        r.last_active_id = Some(first_id);
                    }
                })
                .await?;
        }

        if let Some(proposal) = &pending {
            info!(
                old_id = %proposal.old_id,
                new_id = %proposal.new_id,
                reason = %proposal.reason,
                "Project identity drifted; migration proposed"
            );
        }

        debug!(id = %id, source = candidate.source.as_str(), "Resolved project identity");
        Ok(ProjectIdentity {
            id,
            source: candidate.source,
            sub_project_path: sub_path,
            requires_migration: pending.is_some(),
            suggested_migration: pending,
            remote_url: candidate.remote_url,
        })
    }

    fn candidate(&self, working_copy: &Path, record: &IdentityRecord) -> Candidate {
        if let Some(label) = &record.manual_identity {
            return Candidate {
                source: IdentitySource::Manual,
                input: label.clone(),
                remote_url: None,
                live: None,
            };
        }

        let live = match self.vcs.remotes(working_copy) {
            Ok(remotes) => preferred_remote(&remotes).cloned(),
            Err(e) => {
                warn!(error = %e, "Could not read VCS remotes");
                None
            }
        };
        if let Some(remote) = live {
            return Candidate {
                source: IdentitySource::LiveRemote,
                input: normalize_remote_url(&remote.url),
                remote_url: Some(remote.url.clone()),
                live: Some(remote),
            };
        }

        if let Some(stored) = record.latest_remote() {
            return Candidate {
                source: IdentitySource::StoredRemote,
                input: stored.normalized.clone(),
                remote_url: Some(stored.url.clone()),
                live: None,
            };
        }

        let dir = signature_root(working_copy, record.sub_project_path.as_deref());
        Candidate {
            source: IdentitySource::ContentSignature,
            input: signature::content_signature(&dir),
            remote_url: None,
            live: None,
        }
    }

    /// Pin the identity to a user-chosen label.
    pub async fn set_manual_identity(
        &self,
        working_copy: &Path,
        label: &str,
    ) -> Result<ProjectIdentity> {
        let label = label.trim();
        if label.is_empty() {
            return Err(EnvSyncError::InvalidInput(
                "Manual identity cannot be empty".to_string(),
            ));
        }
        let owned = label.to_string();
        self.records
            .update(&working_copy_key(working_copy), |r| {
                r.manual_identity = Some(owned)
            })
            .await?;
        info!(label, "Manual project identity set");
        self.resolve(working_copy).await
    }

    pub async fn clear_manual_identity(&self, working_copy: &Path) -> Result<ProjectIdentity> {
        self.records
            .update(&working_copy_key(working_copy), |r| r.manual_identity = None)
            .await?;
        info!("Manual project identity cleared");
        self.resolve(working_copy).await
    }

    /// Fold a monorepo sub-project into the identity, or clear it with `None`.
    pub async fn select_sub_project(
        &self,
        working_copy: &Path,
        sub_path: Option<&str>,
    ) -> Result<ProjectIdentity> {
        let sub_path = sub_path
            .map(|p| p.trim().trim_matches('/').to_string())
            .filter(|p| !p.is_empty());

        if let Some(path) = &sub_path {
            let known = sub_project_candidates(working_copy).contains(path);
            if !known && !working_copy.join(path).is_dir() {
                return Err(EnvSyncError::Identity(format!(
                    "No sub-project directory at {}",
                    path
                )));
            }
        }

        self.records
            .update(&working_copy_key(working_copy), |r| {
                r.sub_project_path = sub_path
            })
            .await?;
        self.resolve(working_copy).await
    }

    /// Move synced data from the old id to the new one.
    ///
    /// The remote project is migrated first; local metadata and the record
    /// change only after that succeeds. A missing old remote project is not
    /// an error (nothing was ever pushed). Returns the number of metadata
    /// records moved.
    pub async fn apply_migration(
        &self,
        working_copy: &Path,
        identity: &ProjectIdentity,
        metadata: &MetadataStore,
        remote: &dyn RemoteService,
    ) -> Result<usize> {
        let proposal = identity
            .suggested_migration
            .as_ref()
            .filter(|_| identity.requires_migration)
            .ok_or_else(|| EnvSyncError::Identity("No migration pending".to_string()))?;

        match remote
            .migrate_project(
                &proposal.old_id,
                &proposal.new_id,
                identity.remote_url.as_deref(),
            )
            .await
        {
            Ok(()) => {}
            Err(RemoteError::NotFound(_)) => {
                debug!(old_id = %proposal.old_id, "No remote project to migrate")
            }
            Err(e) => return Err(e.into()),
        }

        let moved = metadata.migrate(&proposal.old_id, &proposal.new_id).await?;

        let entry = MigrationEntry {
            from_id: proposal.old_id.clone(),
            to_id: proposal.new_id.clone(),
            migrated_at: chrono::Utc::now().timestamp(),
            reason: proposal.reason.clone(),
        };
        let new_id = proposal.new_id.clone();
        self.records
            .update(&working_copy_key(working_copy), move |r| {
                r.migrations.push(entry);
                r.last_active_id = Some(new_id);
            })
            .await?;

        info!(
            old_id = %proposal.old_id,
            new_id = %proposal.new_id,
            moved,
            "Applied project identity migration"
        );
        Ok(moved)
    }

    /// Adopt the identity's id as active without moving any data.
    pub async fn keep_identity(&self, working_copy: &Path, identity: &ProjectIdentity) -> Result<()> {
        let id = identity.id.clone();
        self.records
            .update(&working_copy_key(working_copy), move |r| {
                r.last_active_id = Some(id)
            })
            .await?;
        info!(id = %identity.id, "Kept new project identity without migrating");
        Ok(())
    }

    /// Forget everything recorded for the working copy.
    pub async fn reset(&self, working_copy: &Path) -> Result<bool> {
        let existed = self.records.reset(&working_copy_key(working_copy)).await?;
        info!(existed, "Identity record reset");
        Ok(existed)
    }
}

fn signature_root(working_copy: &Path, sub_path: Option<&str>) -> PathBuf {
    match sub_path {
        Some(sub) => working_copy.join(sub),
        None => working_copy.to_path_buf(),
    }
}

/// Sub-project directories, scanned only inside monorepos
fn sub_project_candidates(working_copy: &Path) -> Vec<String> {
    if signature::is_monorepo(working_copy) {
        signature::find_sub_projects(working_copy, MONOREPO_SCAN_DEPTH)
    } else {
        Vec::new()
    }
}

fn migration_reason(candidate: &Candidate, record: &IdentityRecord) -> String {
    match candidate.source {
        IdentitySource::Manual => "manual identity set".to_string(),
        IdentitySource::LiveRemote => match record.latest_remote() {
            Some(previous) if previous.normalized != candidate.input => format!(
                "remote URL changed from {} to {}",
                previous.url,
                candidate.remote_url.as_deref().unwrap_or_default()
            ),
            Some(_) => "sub-project selection changed".to_string(),
            None => "remote URL detected".to_string(),
        },
        IdentitySource::StoredRemote => {
            "no live remote detected; using last known remote".to_string()
        }
        IdentitySource::ContentSignature => {
            "no remote; falling back to content signature".to_string()
        }
    }
}
