//! Remote wire models.

use crate::crypto::EncryptedPayload;
use serde::{Deserialize, Serialize};

/// Body of a create/update request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpload {
    #[serde(flatten)]
    pub payload: EncryptedPayload,
    /// SHA-256 of the plaintext; never encrypted
    pub content_hash: String,
    pub var_count: usize,
}

/// A full remote file record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub file_id: String,
    pub project_id: String,
    pub file_name: String,
    #[serde(flatten)]
    pub payload: EncryptedPayload,
    pub content_hash: String,
    #[serde(default)]
    pub var_count: usize,
    /// Unix timestamp of the last remote write
    pub updated_at: i64,
}

/// A remote file listing entry (no payload)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileSummary {
    pub file_id: String,
    pub file_name: String,
    pub content_hash: String,
    pub updated_at: i64,
}

impl From<&RemoteFile> for RemoteFileSummary {
    fn from(file: &RemoteFile) -> Self {
        Self {
            file_id: file.file_id.clone(),
            file_name: file.file_name.clone(),
            content_hash: file.content_hash.clone(),
            updated_at: file.updated_at,
        }
    }
}
