//! Docker Engine API client over the Unix socket
//!
//! Stats are requested with `stream=false` so the daemon answers with
//! exactly one sample and closes the response.

use super::{CollectError, ContainerRuntime};
use crate::models::{ContainerIdentity, MetricName, RawMetricSet};
use async_trait::async_trait;
use bollard::container::{
    BlkioStatsEntry, InspectContainerOptions, ListContainersOptions, NetworkStats, Stats,
    StatsOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::ContainerSummary;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

/// Socket path when the host filesystem is mounted into the agent's container
pub const HOST_SOCKET_PATH: &str = "/host/var/run/docker.sock";

/// Standard Docker socket path
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Pick the Docker socket to use
///
/// A configured value wins (a `unix://` scheme prefix is accepted). Otherwise
/// the host-mounted socket is preferred when present.
pub fn resolve_socket_path(configured: Option<&str>) -> PathBuf {
    if let Some(url) = configured {
        let path = url.strip_prefix("unix://").unwrap_or(url);
        return if path.starts_with('/') {
            PathBuf::from(path)
        } else {
            PathBuf::from(format!("/{path}"))
        };
    }

    if Path::new(HOST_SOCKET_PATH).exists() {
        PathBuf::from(HOST_SOCKET_PATH)
    } else {
        PathBuf::from(DEFAULT_SOCKET_PATH)
    }
}

/// Docker runtime reached through its Unix socket
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    socket_path: PathBuf,
    timeout: Duration,
}

impl DockerRuntime {
    /// Create a client for the daemon behind `socket_path`
    ///
    /// No connection is opened until the first request.
    pub fn connect(socket_path: impl Into<PathBuf>, timeout: Duration) -> Result<Self, CollectError> {
        let socket_path = socket_path.into();
        let path = socket_path.to_string_lossy().into_owned();
        let docker = Docker::connect_with_unix(
            &path,
            timeout.as_secs().max(1),
            API_DEFAULT_VERSION,
        )
        .map_err(|e| map_docker_error(e, timeout))?;

        Ok(Self {
            docker,
            socket_path,
            timeout,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Run one API call under the per-request timeout
    async fn bounded<T, F>(&self, call: F) -> Result<T, CollectError>
    where
        F: Future<Output = Result<T, BollardError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| CollectError::Timeout(self.timeout))?
            .map_err(|e| map_docker_error(e, self.timeout))
    }
}

/// Map client errors onto collection failures
fn map_docker_error(error: BollardError, timeout: Duration) -> CollectError {
    match error {
        BollardError::RequestTimeoutError => CollectError::Timeout(timeout),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => CollectError::Status {
            status: status_code,
            body: message,
        },
        BollardError::JsonDataError { message, .. } => CollectError::MalformedPayload(message),
        BollardError::JsonSerdeError { err } => CollectError::MalformedPayload(err.to_string()),
        other => CollectError::Transport(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerIdentity>, CollectError> {
        let containers = self
            .bounded(
                self.docker
                    .list_containers(None::<ListContainersOptions<String>>),
            )
            .await?;
        trace!(count = containers.len(), "Docker container list");

        Ok(containers.into_iter().filter_map(into_identity).collect())
    }

    async fn fetch_stats(&self, container_id: &str) -> Result<RawMetricSet, CollectError> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut samples = Box::pin(self.docker.stats(container_id, Some(options)));

        let stats = self
            .bounded(async { samples.next().await.transpose() })
            .await?
            .ok_or_else(|| {
                CollectError::MalformedPayload(format!("no stats sample for {container_id}"))
            })?;

        StatsSample::from(stats).into_raw()
    }

    async fn container_env(&self, container_id: &str) -> Result<Vec<String>, CollectError> {
        let inspect = self
            .bounded(
                self.docker
                    .inspect_container(container_id, None::<InspectContainerOptions>),
            )
            .await?;

        Ok(inspect.config.and_then(|c| c.env).unwrap_or_default())
    }
}

/// Identity of a listed container, `None` when the daemon omitted its id
fn into_identity(summary: ContainerSummary) -> Option<ContainerIdentity> {
    let id = summary.id?;
    let names = summary
        .names
        .unwrap_or_default()
        .into_iter()
        .map(|name| name.strip_prefix('/').map(str::to_string).unwrap_or(name))
        .collect();
    Some(ContainerIdentity::new(id, names, summary.image.unwrap_or_default()))
}

/// Fields of one stats sample the agent reads
#[derive(Debug, Default)]
struct StatsSample {
    memory_usage: Option<u64>,
    memory_limit: Option<u64>,
    cpu_usage: u64,
    system_cpu_usage: Option<u64>,
    networks: Option<HashMap<String, NetworkStats>>,
    /// Pre-1.21 API reported a single interface
    network: Option<NetworkStats>,
    io_service_bytes: Option<Vec<BlkioStatsEntry>>,
}

impl From<Stats> for StatsSample {
    fn from(stats: Stats) -> Self {
        Self {
            memory_usage: stats.memory_stats.usage,
            memory_limit: stats.memory_stats.limit,
            cpu_usage: stats.cpu_stats.cpu_usage.total_usage,
            system_cpu_usage: stats.cpu_stats.system_cpu_usage,
            networks: stats.networks,
            network: stats.network,
            io_service_bytes: stats.blkio_stats.io_service_bytes_recursive,
        }
    }
}

impl StatsSample {
    /// Convert to raw metrics, failing when memory usage is missing
    ///
    /// A stopped container reports no memory usage and zeroed CPU counters.
    fn into_raw(self) -> Result<RawMetricSet, CollectError> {
        let memory_usage = self
            .memory_usage
            .ok_or_else(|| CollectError::MalformedPayload("missing memory_stats.usage".into()))?;

        let (rx, tx) = match (self.networks, self.network) {
            (Some(networks), _) => networks
                .values()
                .fold((0u64, 0u64), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes)),
            (None, Some(network)) => (network.rx_bytes, network.tx_bytes),
            (None, None) => (0, 0),
        };

        let disk_read: u64 = self
            .io_service_bytes
            .unwrap_or_default()
            .iter()
            .filter(|entry| entry.op.eq_ignore_ascii_case("read"))
            .map(|entry| entry.value)
            .sum();

        if self.system_cpu_usage.is_none() {
            debug!("Stats sample has no system_cpu_usage, CPU share will be unknown");
        }

        Ok(RawMetricSet::new()
            .with(MetricName::MemoryUsage, memory_usage as f64)
            .with(
                MetricName::MemoryLimit,
                self.memory_limit.unwrap_or_default() as f64,
            )
            .with(MetricName::NetworkIn, rx as f64)
            .with(MetricName::NetworkOut, tx as f64)
            .with(MetricName::CpuUsage, self.cpu_usage as f64)
            .with(
                MetricName::CpuSystemUsage,
                self.system_cpu_usage.unwrap_or_default() as f64,
            )
            .with(MetricName::DiskRead, disk_read as f64))
    }
}
