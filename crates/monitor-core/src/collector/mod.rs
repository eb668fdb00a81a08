//! Metrics collection from the container runtime
//!
//! This module holds the poll-cycle machinery: runtime access, the live
//! container registry, counter differencing and the cycle orchestrator.

mod delta;
mod discovery;
mod docker;
mod r#loop;

#[cfg(test)]
mod tests;

pub use delta::DeltaTracker;
pub use discovery::{discover_containers, ContainerRegistry, RefreshOutcome};
pub use docker::{resolve_socket_path, DockerRuntime, DEFAULT_SOCKET_PATH, HOST_SOCKET_PATH};
pub use r#loop::{CycleSummary, PollCycle, PollCycleBuilder, DEFAULT_INTERVAL};

use crate::models::{ContainerIdentity, RawMetricSet};
use std::time::Duration;
use thiserror::Error;

pub use async_trait::async_trait;

/// Failures talking to the container runtime
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("runtime returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Access to the container runtime API
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List running containers
    async fn list_containers(&self) -> Result<Vec<ContainerIdentity>, CollectError>;

    /// Read one stats sample for a container
    async fn fetch_stats(&self, container_id: &str) -> Result<RawMetricSet, CollectError>;

    /// Environment variables of a container, `KEY=value` each
    async fn container_env(&self, _container_id: &str) -> Result<Vec<String>, CollectError> {
        Ok(Vec::new())
    }
}
