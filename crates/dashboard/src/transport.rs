//! Typed HTTP client for the job service.
//!
//! `JobGateway` is the seam the rest of the crate talks to; `HttpGateway` is
//! the `reqwest` implementation used in production.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use jobdash_core::{CreateJobRequest, HealthStatus, Job, JobId, JobList, JobStatus};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::ClientConfig;

/// Failure to reach the service or to make sense of its answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Error returned by every gateway operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The service rejected the input (HTTP 400).
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        fields: BTreeMap<String, String>,
    },
    /// No such resource (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

/// Operations offered by the remote job service.
#[async_trait]
pub trait JobGateway: Send + Sync {
    async fn health(&self) -> Result<HealthStatus, ClientError>;

    /// Create a job. Input is forwarded as-is; the service validates it.
    async fn create_job(&self, request: &CreateJobRequest) -> Result<Job, ClientError>;

    async fn get_job(&self, id: &JobId) -> Result<Job, ClientError>;

    /// List jobs, optionally restricted to one status. Order is the
    /// service's and is preserved.
    async fn list_jobs(&self, status: Option<JobStatus>) -> Result<JobList, ClientError>;
}

/// Error body shape used by the service: `{"error": "...", "fields": {...}}`.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

/// `reqwest`-backed gateway.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    api_url: reqwest::Url,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;

        let api_url: String = api_url.into();
        let parsed = reqwest::Url::parse(&api_url)
            .map_err(|e| TransportError::Network(format!("invalid API URL `{api_url}`: {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(TransportError::Network(format!(
                "invalid API URL `{api_url}`: not a base URL"
            )));
        }

        Ok(Self {
            api_url: parsed,
            client,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        Self::new(config.api_url.clone(), config.request_timeout)
    }

    /// Append percent-encoded path segments to the API base URL.
    fn url(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.api_url.clone();
        // Base-ness is checked in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send a request and decode a 2xx JSON body into `T`.
    ///
    /// With `domain_errors` set, 400 and 404 decode into `Validation` and
    /// `NotFound`; otherwise every non-2xx is a `TransportError`.
    async fn send<T>(
        &self,
        req: reqwest::RequestBuilder,
        domain_errors: bool,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let resp = req.send().await.map_err(map_reqwest_error)?;
        let status = resp.status();

        if status.is_success() {
            let bytes = resp.bytes().await.map_err(map_reqwest_error)?;
            return serde_json::from_slice(&bytes)
                .map_err(|e| TransportError::Parse(e.to_string()).into());
        }

        let text = resp.text().await.map_err(map_reqwest_error)?;
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = body
            .message
            .clone()
            .or(body.error.clone())
            .unwrap_or_else(|| text.clone());

        match status {
            reqwest::StatusCode::BAD_REQUEST if domain_errors => Err(ClientError::Validation {
                message,
                fields: body.fields,
            }),
            reqwest::StatusCode::NOT_FOUND if domain_errors => Err(ClientError::NotFound(message)),
            _ => Err(TransportError::Api(status.as_u16(), message).into()),
        }
    }
}

#[async_trait]
impl JobGateway for HttpGateway {
    async fn health(&self) -> Result<HealthStatus, ClientError> {
        self.send(self.client.get(self.url(&["health"])), false).await
    }

    async fn create_job(&self, request: &CreateJobRequest) -> Result<Job, ClientError> {
        let job: Job = self
            .send(self.client.post(self.url(&["jobs"])).json(request), true)
            .await?;
        warn_if_inconsistent(&job);
        tracing::debug!(job_id = %job.id, kind = %job.kind, "job created");
        Ok(job)
    }

    async fn get_job(&self, id: &JobId) -> Result<Job, ClientError> {
        let job: Job = self
            .send(self.client.get(self.url(&["jobs", id.as_str()])), true)
            .await?;
        warn_if_inconsistent(&job);
        Ok(job)
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> Result<JobList, ClientError> {
        let mut req = self.client.get(self.url(&["jobs"]));
        if let Some(status) = status {
            req = req.query(&[("status", status.as_str())]);
        }
        let list: JobList = self.send(req, false).await?;
        list.jobs.iter().for_each(warn_if_inconsistent);
        Ok(list)
    }
}

// The Gateway is the source of truth; a job that breaks the model's
// invariants is still shown, but logged.
fn warn_if_inconsistent(job: &Job) {
    if let Err(err) = job.check_consistency() {
        tracing::warn!(job_id = %job.id, error = %err, "gateway returned an inconsistent job");
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_decode() {
        TransportError::Parse(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}
