//! Query keys, cached values and the snapshots consumers read.

use chrono::{DateTime, Utc};
use jobdash_core::{HealthStatus, JobList, JobStatus};
use serde::Serialize;

use crate::transport::{ClientError, JobGateway};

/// Identifier of a distinct pollable query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// `GET /health`.
    Health,
    /// `GET /jobs`, optionally filtered by status (`None` = all).
    Jobs(Option<JobStatus>),
}

impl QueryKey {
    pub fn jobs(filter: Option<JobStatus>) -> Self {
        Self::Jobs(filter)
    }

    pub fn is_jobs(&self) -> bool {
        matches!(self, QueryKey::Jobs(_))
    }

    pub(crate) async fn fetch(&self, gateway: &dyn JobGateway) -> Result<QueryData, ClientError> {
        match self {
            QueryKey::Health => gateway.health().await.map(QueryData::Health),
            QueryKey::Jobs(filter) => gateway.list_jobs(*filter).await.map(QueryData::Jobs),
        }
    }
}

/// Renders as `health`, `jobs:` or `jobs:<status>`.
impl core::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            QueryKey::Health => f.write_str("health"),
            QueryKey::Jobs(None) => f.write_str("jobs:"),
            QueryKey::Jobs(Some(status)) => write!(f, "jobs:{status}"),
        }
    }
}

/// Last good payload of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryData {
    Health(HealthStatus),
    Jobs(JobList),
}

impl QueryData {
    pub fn as_health(&self) -> Option<&HealthStatus> {
        match self {
            QueryData::Health(health) => Some(health),
            QueryData::Jobs(_) => None,
        }
    }

    pub fn as_jobs(&self) -> Option<&JobList> {
        match self {
            QueryData::Jobs(list) => Some(list),
            QueryData::Health(_) => None,
        }
    }
}

/// Read-only view of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<T> {
    /// Payload of the most recent successful fetch.
    pub value: Option<T>,
    /// A previous value is shown although the latest fetch failed.
    pub is_stale: bool,
    /// No fetch has resolved yet (neither success nor failure).
    pub is_loading: bool,
    /// A fetch is currently in flight.
    pub is_fetching: bool,
    /// Message of the latest failed fetch, cleared by the next success.
    pub last_error: Option<String>,
    /// Wall-clock time of the most recent successful fetch.
    pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> QuerySnapshot<T> {
    /// Snapshot of a key the cache knows nothing about yet.
    pub fn loading() -> Self {
        Self {
            value: None,
            is_stale: false,
            is_loading: true,
            is_fetching: false,
            last_error: None,
            fetched_at: None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> Option<U>) -> QuerySnapshot<U> {
        QuerySnapshot {
            value: self.value.and_then(f),
            is_stale: self.is_stale,
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            last_error: self.last_error,
            fetched_at: self.fetched_at,
        }
    }

    /// Non-fatal warning to display when stale data is shown.
    pub fn stale_warning(&self, key: QueryKey) -> Option<StaleDataWarning> {
        if !self.is_stale {
            return None;
        }
        Some(StaleDataWarning {
            key: key.to_string(),
            message: self.last_error.clone().unwrap_or_default(),
            last_success: self.fetched_at,
        })
    }
}

/// A refresh failed but the previous value is still being shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleDataWarning {
    pub key: String,
    pub message: String,
    pub last_success: Option<DateTime<Utc>>,
}

impl core::fmt::Display for StaleDataWarning {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "showing stale {} data: {}", self.key, self.message)
    }
}

/// Change notification published by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    FetchStarted(QueryKey),
    Updated(QueryKey),
    FetchFailed(QueryKey),
}
