//! Encrypted multi-device sync of a working copy's config files
//!
//! - Per-file optimistic concurrency: every upload carries the last
//!   synced content hash as a precondition
//! - Conflicts are decided by the caller, never merged automatically
//! - Offline pushes are deferred to the bounded offline queue
//! - Missing remote records get bounded auto-recovery

pub mod config;
pub mod engine;
pub mod models;


pub use config::SyncConfig;
pub use engine::{SyncManager, SyncServices};
pub use models::{PollReport, SyncEvent, SyncOutcome, SyncStatus};
