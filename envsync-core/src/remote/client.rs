//! HTTP client for the envsync API.

use crate::remote::models::{FileUpload, RemoteFile, RemoteFileSummary};
use crate::remote::{RemoteError, RemoteService, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// HTTP implementation of [`RemoteService`]
pub struct HttpRemoteService {
    client: reqwest::Client,
    api_url: String,
    access_token: String,
}

impl HttpRemoteService {
    /// Create a new client.
    pub fn new(api_url: &str, access_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RemoteError::Transient(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_url, path);
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let resp = request
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_else(|_| "unknown".to_string());
        debug!(%status, "Remote request failed");
        Err(classify(status, body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Transient(format!("Invalid response body: {}", e)))
    }
}

/// Map an HTTP failure status onto the remote error taxonomy
pub fn classify(status: StatusCode, body: String) -> RemoteError {
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound(body),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            RemoteError::PreconditionFailed(body)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(body),
        other => RemoteError::Transient(format!("{}: {}", other, body)),
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn check_project_exists(&self, project_id: &str) -> Result<bool> {
        let path = format!("/api/v1/projects/{}", project_id);
        match self.send(self.request(Method::GET, &path)).await {
            Ok(_) => Ok(true),
            Err(RemoteError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_project(&self, project_id: &str) -> Result<()> {
        let body = serde_json::json!({ "projectId": project_id });
        self.send(self.request(Method::POST, "/api/v1/projects").json(&body))
            .await?;
        Ok(())
    }

    async fn get_files(&self, project_id: &str) -> Result<Vec<RemoteFileSummary>> {
        let path = format!("/api/v1/projects/{}/files", project_id);
        self.send_json(self.request(Method::GET, &path)).await
    }

    async fn get_file(&self, file_id: &str) -> Result<RemoteFile> {
        let path = format!("/api/v1/files/{}", file_id);
        self.send_json(self.request(Method::GET, &path)).await
    }

    async fn create_file(
        &self,
        project_id: &str,
        file_name: &str,
        upload: &FileUpload,
    ) -> Result<()> {
        let path = format!("/api/v1/projects/{}/files", project_id);
        let mut body = serde_json::to_value(upload)
            .map_err(|e| RemoteError::Transient(format!("Encode upload: {}", e)))?;
        body["fileName"] = serde_json::Value::String(file_name.to_string());

        self.send(self.request(Method::POST, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn update_file(
        &self,
        file_id: &str,
        upload: &FileUpload,
        base_hash: Option<&str>,
    ) -> Result<()> {
        let path = format!("/api/v1/files/{}", file_id);
        let mut request = self.request(Method::PUT, &path).json(upload);
        if let Some(base) = base_hash {
            request = request.header("If-Match", base);
        }
        self.send(request).await?;
        Ok(())
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let path = format!("/api/v1/files/{}", file_id);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn migrate_project(
        &self,
        old_id: &str,
        new_id: &str,
        remote_url: Option<&str>,
    ) -> Result<()> {
        let path = format!("/api/v1/projects/{}/migrate", old_id);
        let body = serde_json::json!({
            "newProjectId": new_id,
            "remoteUrl": remote_url,
        });
        self.send(self.request(Method::POST, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/v1/health", self.api_url);
        // Unauthenticated liveness endpoint
        self.send(self.client.get(url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, String::new()),
            RemoteError::NotFound(_)
        ));
        assert!(matches!(
            classify(StatusCode::PRECONDITION_FAILED, String::new()),
            RemoteError::PreconditionFailed(_)
        ));
        assert!(matches!(
            classify(StatusCode::CONFLICT, String::new()),
            RemoteError::PreconditionFailed(_)
        ));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, String::new()),
            RemoteError::Unauthorized(_)
        ));
        assert!(classify(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
    }

    #[test]
    fn trailing_slash_trimmed() {
        let client = HttpRemoteService::new("https://api.example.com/", "token").unwrap();
        assert_eq!(client.api_url, "https://api.example.com");
    }

    #[tokio::test]
    async fn unreachable_host_is_transient() {
        // Port 9 (discard) on localhost is almost never listening
        let client = HttpRemoteService::new("http://127.0.0.1:9", "token").unwrap();
        let err = client.health_check().await.unwrap_err();
        assert!(err.is_transient());
    }
}
