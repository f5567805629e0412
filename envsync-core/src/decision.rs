//! User decisions the engine cannot make on its own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Both sides changed since the last sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPrompt {
    pub file_name: String,
    pub local_hash: String,
    pub remote_hash: String,
    pub base_hash: String,
    pub local_var_count: usize,
    pub remote_var_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    /// Overwrite the remote with the local file
    UseLocal,
    /// Overwrite the local file with the remote copy
    UseRemote,
    /// Leave both sides untouched
    Cancel,
}

/// Proposed change of project identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProposal {
    pub old_id: String,
    pub new_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationChoice {
    /// Move synced data to the new id
    Migrate,
    /// Adopt the new id without moving data
    Keep,
    /// Ask again next time
    Later,
}

/// Answers conflict and migration prompts.
///
/// The engine awaits the answer and does no sync work for the file in
/// question until it returns.
#[async_trait]
pub trait DecisionCallback: Send + Sync {
    async fn resolve_conflict(&self, prompt: ConflictPrompt) -> ConflictChoice;

    async fn confirm_migration(&self, proposal: MigrationProposal) -> MigrationChoice;
}

/// Answers every prompt with preset choices
#[derive(Debug, Clone, Copy)]
pub struct FixedDecision {
    pub conflict: ConflictChoice,
    pub migration: MigrationChoice,
}

impl Default for FixedDecision {
    fn default() -> Self {
        Self {
            conflict: ConflictChoice::Cancel,
            migration: MigrationChoice::Later,
        }
    }
}

#[async_trait]
impl DecisionCallback for FixedDecision {
    async fn resolve_conflict(&self, _prompt: ConflictPrompt) -> ConflictChoice {
        self.conflict
    }

    async fn confirm_migration(&self, _proposal: MigrationProposal) -> MigrationChoice {
        self.migration
    }
}
