//! Project identity resolution.
//!
//! Maps a working copy to a durable remote project id. Sources are tried
//! in priority order: manual label, live VCS remote, last stored remote,
//! content signature. When a recomputed id drifts from the one last used,
//! a migration is proposed but never applied implicitly.

pub mod normalize;
pub mod record;
pub mod resolver;
pub mod signature;
pub mod vcs;

pub use normalize::{identity_hash, normalize_remote_url};
pub use record::{IdentityRecord, IdentityStore, MigrationEntry, RemoteObservation};
pub use resolver::IdentityResolver;
pub use vcs::{GitConfigLookup, VcsRemote, VcsRemoteLookup};

use crate::decision::MigrationProposal;
use serde::{Deserialize, Serialize};

/// Where a project id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Manual,
    LiveRemote,
    StoredRemote,
    ContentSignature,
}

impl IdentitySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::LiveRemote => "live remote",
            Self::StoredRemote => "stored remote",
            Self::ContentSignature => "content signature",
        }
    }
}

/// Freshly computed identity of a working copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIdentity {
    pub id: String,
    pub source: IdentitySource,
    pub sub_project_path: Option<String>,
    pub requires_migration: bool,
    pub suggested_migration: Option<MigrationProposal>,
    /// Raw remote URL behind a remote-derived id
    pub remote_url: Option<String>,
}

impl ProjectIdentity {
    /// The id synced data currently lives under.
    ///
    /// While a migration is pending the data stays at the old id.
    pub fn effective_id(&self) -> &str {
        match &self.suggested_migration {
            Some(proposal) if self.requires_migration => &proposal.old_id,
            _ => &self.id,
        }
    }
}
