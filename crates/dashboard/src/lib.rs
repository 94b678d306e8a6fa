//! `jobdash-dashboard`
//!
//! **Responsibility:** client-side synchronization of a remote job service.
//!
//! This crate provides:
//! - A typed transport over the service's REST API
//! - A polling cache with invalidation and request coalescing
//! - Job submission that keeps cached lists fresh
//! - A dashboard view-model and a plain-text renderer
//!
//! The remote service stays the source of truth; nothing is persisted.

pub mod cache;
pub mod config;
pub mod mutation;
pub mod query;
pub mod render;
pub mod transport;
pub mod view_model;

#[cfg(test)]
mod testing;

pub use cache::{CacheConfig, Invalidation, Subscription, SyncCache};
pub use config::ClientConfig;
pub use mutation::JobSubmitter;
pub use query::{CacheEvent, QueryData, QueryKey, QuerySnapshot, StaleDataWarning};
pub use transport::{ClientError, HttpGateway, JobGateway, TransportError};
pub use view_model::{Changes, Dashboard, RenderModel, SubmitError};
