//! `jobdash-core`: domain model of the job-processing service as the
//! dashboard client sees it.
//!
//! This crate contains **pure domain** types (no transport or runtime
//! concerns): jobs, their lifecycle, health status and list responses.

pub mod error;
pub mod health;
pub mod id;
pub mod job;

pub use error::{DomainError, DomainResult};
pub use health::HealthStatus;
pub use id::JobId;
pub use job::{CreateJobRequest, Job, JobKind, JobList, JobResult, JobStatus};
