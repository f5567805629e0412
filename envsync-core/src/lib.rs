//! envsync Core Library
//!
//! This library provides the client-resident sync engine for envsync:
//! end-to-end encrypted synchronization of a project's environment and
//! configuration files across every device of one account.
//!
//! Layers, leaves first:
//! - [`crypto`]: key derivation, AES-256-GCM payload sealing, RSA device keys
//! - [`identity`]: stable project identity resolution and migration
//! - [`metadata`]: per-file sync state with serialized writes
//! - [`connection`]: debounced reachability monitoring
//! - [`queue`]: bounded, priority-ordered offline backlog
//! - [`sync`]: the orchestrating sync manager

pub mod connection;
pub mod crypto;
pub mod debounce;
pub mod decision;
pub mod files;
pub mod identity;
pub mod metadata;
pub mod platform;
pub mod queue;
pub mod remote;
pub mod storage;
pub mod sync;

pub use connection::{ConnectionConfig, ConnectionMonitor, ConnectionState};
pub use crypto::{
    content_hash, decrypt, derive_key, encrypt, AccountKeys, CryptoError, DeviceKeyPair,
    EncryptedPayload, SymmetricKey,
};
pub use decision::{ConflictChoice, DecisionCallback, MigrationChoice};
pub use files::{LocalProjectFiles, ProjectFiles};
pub use identity::{IdentityResolver, IdentitySource, ProjectIdentity};
pub use metadata::{file_id, MetadataStore, TrackedFile};
pub use platform::{
    ensure_config_dir, ensure_data_dir, get_config_dir, get_data_dir, get_default_config_path,
    get_default_database_path, get_default_secrets_path,
};
pub use queue::{OfflineQueue, OperationType, QueuedOperation};
pub use remote::{RemoteError, RemoteService};
pub use storage::{KvStore, SecretVault, StorageError};
pub use sync::{SyncConfig, SyncEvent, SyncManager, SyncOutcome};

use thiserror::Error;

/// Result type for envsync operations
pub type Result<T> = std::result::Result<T, EnvSyncError>;

/// General error type for envsync operations
#[derive(Error, Debug)]
pub enum EnvSyncError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Remote error: {0}")]
    Remote(#[from] remote::RemoteError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("{file_name} is {size} bytes, over the {limit} byte limit")]
    CapacityExceeded {
        file_name: String,
        size: u64,
        limit: u64,
    },

    #[error(
        "Remote copy of {file_name} kept disappearing ({attempts} attempts); re-initialize it manually"
    )]
    RecoveryExhausted { file_name: String, attempts: u32 },

    #[error("Not tracked: {0}")]
    NotTracked(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnvSyncError {
    /// The remote error category, if this error came from the remote service.
    pub fn remote(&self) -> Option<&remote::RemoteError> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}
