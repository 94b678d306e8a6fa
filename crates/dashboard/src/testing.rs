//! Scripted in-memory gateway for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jobdash_core::{CreateJobRequest, HealthStatus, Job, JobId, JobList, JobResult, JobStatus};

use crate::transport::{ClientError, JobGateway, TransportError};

#[derive(Default)]
struct Script {
    jobs: Vec<Job>,
    health_plan: VecDeque<Result<HealthStatus, ClientError>>,
    list_failures: VecDeque<ClientError>,
    create_error: Option<ClientError>,
    latency: Duration,
    calls: Vec<String>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    next_id: u64,
    tick: i64,
}

/// Gateway whose answers are scripted by the test.
///
/// Calls are recorded as `health`, `list:<status>`, `create` and
/// `get:<id>`, with the number of concurrent calls per label tracked.
#[derive(Default)]
pub(crate) struct ScriptedGateway {
    script: Mutex<Script>,
}

pub(crate) fn network_error() -> ClientError {
    TransportError::Network("connection refused".to_string()).into()
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 15, 10, 0, 0).single().unwrap_or_default()
}

impl ScriptedGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call waits this long (virtual time) before answering.
    pub(crate) fn set_latency(&self, latency: Duration) {
        self.script().latency = latency;
    }

    pub(crate) fn push_health(&self, outcome: Result<HealthStatus, ClientError>) {
        self.script().health_plan.push_back(outcome);
    }

    pub(crate) fn fail_next_lists(&self, count: usize) {
        let mut script = self.script();
        for _ in 0..count {
            script.list_failures.push_back(network_error());
        }
    }

    pub(crate) fn reject_creates(&self, error: ClientError) {
        self.script().create_error = Some(error);
    }

    pub(crate) fn calls(&self, label: &str) -> usize {
        self.script().calls.iter().filter(|c| c.as_str() == label).count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.script().calls.len()
    }

    pub(crate) fn max_in_flight(&self, label: &str) -> usize {
        self.script().max_in_flight.get(label).copied().unwrap_or(0)
    }

    /// Move a job to `status`, bumping `updated_at` and filling the
    /// outcome fields the way the worker does.
    pub(crate) fn advance_job(&self, id: &str, status: JobStatus) {
        let mut script = self.script();
        script.tick += 1;
        let now = base_time() + chrono::Duration::seconds(script.tick);
        if let Some(job) = script.jobs.iter_mut().find(|j| j.id.as_str() == id) {
            job.status = status;
            job.updated_at = now;
            match status {
                JobStatus::Completed => {
                    job.result = Some(JobResult {
                        processed_at: now,
                        input_count: job.data.len() as u64,
                        message: format!("Job of type '{}' processed", job.kind),
                    });
                }
                JobStatus::Failed => job.error = Some("processing failed".to_string()),
                _ => {}
            }
        }
    }

    fn enter(&self, label: String) -> (InFlight<'_>, Duration) {
        let mut script = self.script();
        script.calls.push(label.clone());
        let current = {
            let count = script.in_flight.entry(label.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let max = script.max_in_flight.entry(label.clone()).or_insert(0);
        *max = (*max).max(current);
        (InFlight { gateway: self, label }, script.latency)
    }
}

struct InFlight<'a> {
    gateway: &'a ScriptedGateway,
    label: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.gateway.script().in_flight.get_mut(&self.label) {
            *count = count.saturating_sub(1);
        }
    }
}

async fn wait(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

#[async_trait]
impl JobGateway for ScriptedGateway {
    async fn health(&self) -> Result<HealthStatus, ClientError> {
        let (_guard, latency) = self.enter("health".to_string());
        wait(latency).await;
        self.script()
            .health_plan
            .pop_front()
            .unwrap_or_else(|| Ok(HealthStatus::healthy()))
    }

    async fn create_job(&self, request: &CreateJobRequest) -> Result<Job, ClientError> {
        let (_guard, latency) = self.enter("create".to_string());
        wait(latency).await;

        let mut script = self.script();
        if let Some(err) = script.create_error.clone() {
            return Err(err);
        }
        script.next_id += 1;
        script.tick += 1;
        let now = base_time() + chrono::Duration::seconds(script.tick);
        let job = Job {
            id: JobId::from(script.next_id.to_string()),
            status: JobStatus::Pending,
            kind: request.kind.clone(),
            data: request.data.clone(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        script.jobs.insert(0, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: &JobId) -> Result<Job, ClientError> {
        let (_guard, latency) = self.enter(format!("get:{id}"));
        wait(latency).await;
        self.script()
            .jobs
            .iter()
            .find(|j| &j.id == id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound("job not found".to_string()))
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> Result<JobList, ClientError> {
        let label = format!("list:{}", status.map(|s| s.as_str()).unwrap_or(""));
        let (_guard, latency) = self.enter(label);
        wait(latency).await;

        let mut script = self.script();
        if let Some(err) = script.list_failures.pop_front() {
            return Err(err);
        }
        let jobs: Vec<Job> = script
            .jobs
            .iter()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        Ok(JobList {
            count: jobs.len(),
            jobs,
        })
    }
}

/// Let spawned tasks run without advancing the (paused) clock.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
