//! Request/response client for the remote job registry.
//!
//! Stateless by design: no retry, no caching. The polling loop owns retry
//! policy; this layer only maps HTTP outcomes onto the error taxonomy.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::Config;
use crate::job::{Job, JobKind};

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Network failure or a non-success response outside the other variants.
    #[error("registry transport error: {0}")]
    Transport(String),
    /// The job id no longer exists on the registry (purged).
    #[error("job {0} not found")]
    NotFound(String),
    /// The registry rejected a start request (4xx).
    #[error("registry rejected request: {0}")]
    Validation(String),
}

/// Seam between the monitor and the HTTP backend. Tests script this trait
/// directly; production uses [`HttpRegistry`].
#[async_trait]
pub trait JobRegistry: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<Job>, RegistryError>;
    async fn job_detail(&self, id: &str) -> Result<Job, RegistryError>;
    async fn start_job(&self, kind: JobKind, params: serde_json::Value) -> Result<String, RegistryError>;
    async fn cancel_job(&self, id: &str) -> Result<(), RegistryError>;
}

pub struct HttpRegistry {
    client: Client,
    base: String,
}

#[derive(Deserialize)]
struct ListResponse {
    jobs: Vec<Job>,
}

#[derive(Deserialize)]
struct StartResponse {
    job_id: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpRegistry {
    pub fn new(cfg: &Config) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.http_timeout_ms))
            .build()
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base: cfg.registry_base.trim_end_matches('/').to_string(),
        })
    }

    async fn error_text(resp: reqwest::Response) -> String {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(e) => format!("{}: {}", status, e.error),
            Err(_) if body.is_empty() => status.to_string(),
            Err(_) => format!("{}: {}", status, body),
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Transport(err.to_string())
    }
}

#[async_trait]
impl JobRegistry for HttpRegistry {
    async fn list_jobs(&self) -> Result<Vec<Job>, RegistryError> {
        let url = format!("{}/jobs", self.base);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(RegistryError::Transport(Self::error_text(resp).await));
        }
        let data: ListResponse = resp.json().await?;
        Ok(data.jobs)
    }

    async fn job_detail(&self, id: &str) -> Result<Job, RegistryError> {
        let url = format!("{}/jobs/{}", self.base, id);
        let resp = self.client.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(RegistryError::Transport(Self::error_text(resp).await));
        }
        Ok(resp.json().await?)
    }

    async fn start_job(&self, kind: JobKind, params: serde_json::Value) -> Result<String, RegistryError> {
        let url = format!("{}/jobs", self.base);
        let body = json!({ "kind": kind, "params": params });
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if status.is_client_error() {
            return Err(RegistryError::Validation(Self::error_text(resp).await));
        }
        if !status.is_success() {
            return Err(RegistryError::Transport(Self::error_text(resp).await));
        }
        let data: StartResponse = resp.json().await?;
        Ok(data.job_id)
    }

    async fn cancel_job(&self, id: &str) -> Result<(), RegistryError> {
        let url = format!("{}/jobs/{}", self.base, id);
        let resp = self.client.delete(&url).send().await?;
        let status = resp.status();
        // Cancelling a job that is already terminal or already purged is a
        // no-op success; the caller cannot act on the distinction.
        if status.is_success()
            || status == StatusCode::NOT_FOUND
            || status == StatusCode::CONFLICT
        {
            return Ok(());
        }
        Err(RegistryError::Transport(Self::error_text(resp).await))
    }
}
