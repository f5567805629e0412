//! Sync outcomes, events and status.

use crate::connection::ConnectionState;
use crate::decision::{ConflictChoice, MigrationProposal};
use crate::identity::IdentitySource;
use crate::queue::OperationType;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// What a single sync operation did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Local content uploaded
    Pushed,
    /// Remote content written to the working copy
    Pulled,
    /// Both sides already agree
    Unchanged,
    /// File is not tracked; nothing to do
    Untracked,
    /// Another sync of the same file is in flight; it will pick this up
    Coalesced,
    /// Deferred to the offline queue
    Queued,
    /// Both sides changed; the caller decided
    Conflict(ConflictChoice),
    /// Remote record was missing and has been re-created
    Recreated,
    /// Local file disappeared; tracking dropped
    Ghost,
    /// File is locked by another trigger
    Skipped,
}

/// Tally of one poll pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub checked: usize,
    pub pulled: usize,
    pub conflicts: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PollReport {
    pub(crate) fn record(&mut self, outcome: SyncOutcome) {
        self.checked += 1;
        match outcome {
            SyncOutcome::Pulled => self.pulled += 1,
            SyncOutcome::Conflict(_) => self.conflicts += 1,
            SyncOutcome::Skipped => self.skipped += 1,
            _ => {}
        }
    }
}

/// Notifications published on the manager's event channel, in emission order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Pushed { file_name: String },
    Pulled { file_name: String },
    Conflict { file_name: String, choice: ConflictChoice },
    Queued { file_name: String, op_type: OperationType },
    RecoveryAttempted { file_name: String, attempt: u32 },
    RecoveryExhausted { file_name: String, attempts: u32 },
    GhostDetected { file_name: String },
    Connectivity { state: ConnectionState },
    QueueDrained { succeeded: usize, remaining: usize },
    MigrationProposed { proposal: MigrationProposal },
    Migrated { old_id: String, new_id: String, moved: usize },
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub project_id: String,
    pub identity_source: IdentitySource,
    pub migration_pending: bool,
    pub tracked_files: usize,
    pub queued_operations: usize,
    pub connection: ConnectionState,
    pub last_good: Option<DateTime<Utc>>,
}
