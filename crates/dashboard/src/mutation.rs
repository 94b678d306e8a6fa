//! Job submission.
//!
//! A successful create invalidates every cached job list (all filters) so
//! the new job shows up without waiting for the next tick. Failed creates
//! leave the cache alone.

use std::sync::Arc;

use jobdash_core::{CreateJobRequest, Job, JobKind};

use crate::cache::{Invalidation, SyncCache};
use crate::query::QueryKey;
use crate::transport::{ClientError, JobGateway};

#[derive(Clone)]
pub struct JobSubmitter {
    gateway: Arc<dyn JobGateway>,
    cache: SyncCache,
}

impl std::fmt::Debug for JobSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSubmitter").field("cache", &self.cache).finish()
    }
}

impl JobSubmitter {
    pub fn new(gateway: Arc<dyn JobGateway>, cache: SyncCache) -> Self {
        Self { gateway, cache }
    }

    /// Create a job and, on success, invalidate job lists before returning.
    pub async fn submit_job(&self, kind: JobKind, data: String) -> Result<Job, ClientError> {
        let request = CreateJobRequest::new(kind, data);

        match self.gateway.create_job(&request).await {
            Ok(job) => {
                let outcomes = self.cache.invalidate_where(QueryKey::is_jobs);
                let refetching = outcomes
                    .iter()
                    .filter(|(_, outcome)| *outcome == Invalidation::Refetching)
                    .count();
                tracing::info!(
                    job_id = %job.id,
                    job_type = %job.kind,
                    invalidated = outcomes.len(),
                    refetching,
                    "job created"
                );
                Ok(job)
            }
            Err(err) => {
                tracing::warn!(job_type = %request.kind, error = %err, "job creation failed");
                Err(err)
            }
        }
    }
}
