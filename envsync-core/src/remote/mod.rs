//! Remote data service boundary.
//!
//! The service stores only ciphertexts plus cleartext content hashes used
//! as optimistic-concurrency preconditions. It never sees plaintext or keys.

#[cfg(feature = "http")]
pub mod client;
pub mod models;
#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "http")]
pub use client::HttpRemoteService;
pub use models::{FileUpload, RemoteFile, RemoteFileSummary};

use async_trait::async_trait;
use thiserror::Error;

/// Categorized remote failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The addressed record does not exist on the remote
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote state no longer matches the caller's base hash
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network failure or server-side error; safe to retry later
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type for remote operations
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Operations offered by the remote data service
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn check_project_exists(&self, project_id: &str) -> Result<bool>;

    async fn create_project(&self, project_id: &str) -> Result<()>;

    async fn get_files(&self, project_id: &str) -> Result<Vec<RemoteFileSummary>>;

    async fn get_file(&self, file_id: &str) -> Result<RemoteFile>;

    async fn create_file(
        &self,
        project_id: &str,
        file_name: &str,
        upload: &FileUpload,
    ) -> Result<()>;

    /// Precondition-checked write: rejected with
    /// [`RemoteError::PreconditionFailed`] unless the remote's current
    /// content hash equals `base_hash`. `None` writes unconditionally.
    async fn update_file(
        &self,
        file_id: &str,
        upload: &FileUpload,
        base_hash: Option<&str>,
    ) -> Result<()>;

    async fn delete_file(&self, file_id: &str) -> Result<()>;

    async fn migrate_project(
        &self,
        old_id: &str,
        new_id: &str,
        remote_url: Option<&str>,
    ) -> Result<()>;

    async fn health_check(&self) -> Result<()>;
}
