//! Dashboard view-model.
//!
//! Holds the state the user edits (status filter and the job creation form)
//! and derives a [`RenderModel`] from it plus the cache contents. Renderers
//! call [`Dashboard::snapshot`] whenever [`Changes::changed`] fires.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use jobdash_core::{Job, JobId, JobKind, JobList, JobStatus};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::cache::{Subscription, SyncCache};
use crate::mutation::JobSubmitter;
use crate::query::{CacheEvent, QueryKey, QuerySnapshot, StaleDataWarning};
use crate::transport::{ClientError, JobGateway};

/// Why [`Dashboard::submit`] did not create a job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("a job submission is already in progress")]
    InFlight,
    #[error(transparent)]
    Rejected(#[from] ClientError),
}

struct ViewState {
    status_filter: Option<JobStatus>,
    pending_job_type: JobKind,
    pending_job_data: String,
    submitting: bool,
    last_submit_error: Option<String>,
    last_created: Option<JobId>,
    // Held for their side effect: they keep the keys polled.
    _health: Subscription,
    jobs: Subscription,
    seen: HashMap<JobId, JobStatus>,
}

/// Client-side state of the job dashboard.
pub struct Dashboard {
    cache: SyncCache,
    submitter: JobSubmitter,
    gateway: Arc<dyn JobGateway>,
    state: Mutex<ViewState>,
    revision: watch::Sender<u64>,
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("status_filter", &self.status_filter())
            .finish_non_exhaustive()
    }
}

impl Dashboard {
    /// Observe health and the unfiltered job list. Must be called from
    /// within a tokio runtime.
    pub fn new(gateway: Arc<dyn JobGateway>, cache: SyncCache) -> Self {
        let submitter = JobSubmitter::new(gateway.clone(), cache.clone());
        let state = ViewState {
            status_filter: None,
            pending_job_type: JobKind::default(),
            pending_job_data: String::new(),
            submitting: false,
            last_submit_error: None,
            last_created: None,
            _health: cache.observe(QueryKey::Health),
            jobs: cache.observe(QueryKey::jobs(None)),
            seen: HashMap::new(),
        };
        let (revision, _) = watch::channel(0);

        Self {
            cache,
            submitter,
            gateway,
            state: Mutex::new(state),
            revision,
        }
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    pub fn cache(&self) -> &SyncCache {
        &self.cache
    }

    pub fn status_filter(&self) -> Option<JobStatus> {
        self.state().status_filter
    }

    /// Switch the job list to `filter` (`None` = every status).
    ///
    /// The previous list key stops polling; form fields are kept.
    pub fn set_status_filter(&self, filter: Option<JobStatus>) {
        let previous = {
            let mut state = self.state();
            if state.status_filter == filter {
                return;
            }
            let next = self.cache.observe(QueryKey::jobs(filter));
            state.status_filter = filter;
            std::mem::replace(&mut state.jobs, next)
        };
        tracing::info!(
            from = %previous.key(),
            to = %QueryKey::jobs(filter),
            "status filter changed"
        );
        drop(previous);
        self.touch();
    }

    pub fn set_pending_job_type(&self, kind: JobKind) {
        self.state().pending_job_type = kind;
        self.touch();
    }

    pub fn set_pending_job_data(&self, data: impl Into<String>) {
        self.state().pending_job_data = data.into();
        self.touch();
    }

    /// Submit the pending form.
    ///
    /// Only one submission runs at a time. On success the form resets to its
    /// defaults; on failure the fields are kept and the error is shown.
    pub async fn submit(&self) -> Result<Job, SubmitError> {
        let (kind, data) = {
            let mut state = self.state();
            if state.submitting {
                return Err(SubmitError::InFlight);
            }
            state.submitting = true;
            state.last_submit_error = None;
            (state.pending_job_type.clone(), state.pending_job_data.clone())
        };
        self.touch();

        let _submitting = SubmittingGuard { dashboard: self };
        let outcome = self.submitter.submit_job(kind, data).await;

        let mut state = self.state();
        match &outcome {
            Ok(job) => {
                state.pending_job_type = JobKind::default();
                state.pending_job_data.clear();
                state.last_created = Some(job.id.clone());
            }
            Err(err) => state.last_submit_error = Some(err.to_string()),
        }
        drop(state);

        outcome.map_err(SubmitError::from)
    }

    /// One-shot lookup of a single job; bypasses the cache.
    pub async fn get_job(&self, id: &JobId) -> Result<Job, ClientError> {
        self.gateway.get_job(id).await
    }

    /// Fires after every cache event and every local state change.
    pub fn changes(&self) -> Changes {
        Changes {
            events: self.cache.subscribe(),
            local: self.revision.subscribe(),
        }
    }

    /// Derive the current render model.
    pub fn snapshot(&self) -> RenderModel {
        let mut state = self.state();
        let filter = state.status_filter;
        let key = QueryKey::jobs(filter);
        let health = self.cache.health();
        let jobs = self.cache.jobs(filter);

        if let Some(list) = &jobs.value {
            track_transitions(&mut state.seen, list);
        }

        RenderModel {
            health: HealthView {
                status: health.value.as_ref().map(|h| h.status.clone()),
                healthy: health.value.as_ref().is_some_and(|h| h.is_healthy()),
                is_loading: health.is_loading,
                is_stale: health.is_stale,
                error: health.last_error.clone(),
            },
            status_filter: filter,
            jobs: JobsView::from_snapshot(key, &jobs),
            form: FormView {
                job_type: state.pending_job_type.clone(),
                job_data: state.pending_job_data.clone(),
                submitting: state.submitting,
                error: state.last_submit_error.clone(),
                last_created: state.last_created.clone(),
            },
        }
    }
}

// Status must only move forward; a regression means the Gateway (or a
// proxy cache in front of it) served an out-of-date list. Only ids in the
// current list are remembered. Returns how many regressions were logged.
fn track_transitions(seen: &mut HashMap<JobId, JobStatus>, list: &JobList) -> usize {
    let mut current = HashMap::with_capacity(list.jobs.len());
    let mut regressions = 0;

    for job in &list.jobs {
        let regression = seen
            .get(&job.id)
            .and_then(|previous| previous.check_transition(job.status).err());
        if let Some(err) = regression {
            tracing::warn!(job_id = %job.id, error = %err, "job status went backwards");
            regressions += 1;
        }
        current.insert(job.id.clone(), job.status);
    }

    *seen = current;
    regressions
}

struct SubmittingGuard<'a> {
    dashboard: &'a Dashboard,
}

impl Drop for SubmittingGuard<'_> {
    fn drop(&mut self) {
        self.dashboard.state().submitting = false;
        self.dashboard.touch();
    }
}

/// Change notifications for a [`Dashboard`].
pub struct Changes {
    events: broadcast::Receiver<CacheEvent>,
    local: watch::Receiver<u64>,
}

impl Changes {
    /// Wait for the next change. Returns `None` once the dashboard is gone.
    pub async fn changed(&mut self) -> Option<()> {
        tokio::select! {
            event = self.events.recv() => match event {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => Some(()),
                Err(broadcast::error::RecvError::Closed) => None,
            },
            local = self.local.changed() => local.ok(),
        }
    }
}

/// Everything a renderer needs, derived from cache and local state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderModel {
    pub health: HealthView,
    pub status_filter: Option<JobStatus>,
    pub jobs: JobsView,
    pub form: FormView,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthView {
    pub status: Option<String>,
    pub healthy: bool,
    pub is_loading: bool,
    pub is_stale: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobsView {
    /// The list for the active filter has never resolved.
    pub is_loading: bool,
    /// Resolved with zero jobs.
    pub is_empty: bool,
    pub is_fetching: bool,
    pub count: usize,
    pub rows: Vec<JobRow>,
    /// Latest fetch error when there is no value to fall back on.
    pub error: Option<String>,
    pub stale_warning: Option<StaleDataWarning>,
}

impl JobsView {
    fn from_snapshot(key: QueryKey, snapshot: &QuerySnapshot<JobList>) -> Self {
        let (count, rows) = match &snapshot.value {
            Some(list) => (list.count, list.jobs.iter().map(JobRow::from).collect()),
            None => (0, Vec::new()),
        };

        Self {
            is_loading: snapshot.is_loading,
            is_empty: snapshot.value.as_ref().is_some_and(JobList::is_empty),
            is_fetching: snapshot.is_fetching,
            count,
            rows,
            error: if snapshot.value.is_none() {
                snapshot.last_error.clone()
            } else {
                None
            },
            stale_warning: snapshot.stale_warning(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRow {
    pub id: JobId,
    pub kind: String,
    pub status: JobStatus,
    pub data: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            kind: job.kind.label().to_string(),
            status: job.status,
            data: job.data.clone(),
            result: job.result.as_ref().map(|r| r.summary()),
            error: job.error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormView {
    pub job_type: JobKind,
    pub job_data: String,
    pub submitting: bool,
    pub error: Option<String>,
    pub last_created: Option<JobId>,
}
