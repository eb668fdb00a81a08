//! Observability infrastructure for the stats agent
//!
//! Provides:
//! - Prometheus metrics (cycle latency, containers monitored, skipped fetches, host status)
//! - Structured JSON logging with tracing

use crate::models::StatusLevel;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Encoder, Histogram, IntCounter,
    IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for cycle latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AgentMetricsInner {
    cycle_latency_seconds: Histogram,
    cycles_total: IntCounter,
    containers_monitored: IntGauge,
    containers_skipped: IntCounter,
    discovery_errors: IntCounter,
    report_errors: IntCounter,
    host_status: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "docker_stats_cycle_latency_seconds",
                "Time spent running one poll cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            cycles_total: register_int_counter!(
                "docker_stats_cycles_total",
                "Total number of poll cycles run"
            )
            .expect("Failed to register cycles_total"),

            containers_monitored: register_int_gauge!(
                "docker_stats_containers_monitored",
                "Number of containers currently being monitored"
            )
            .expect("Failed to register containers_monitored"),

            containers_skipped: register_int_counter!(
                "docker_stats_containers_skipped_total",
                "Total number of container stats fetches that failed"
            )
            .expect("Failed to register containers_skipped"),

            discovery_errors: register_int_counter!(
                "docker_stats_discovery_errors_total",
                "Total number of failed container discoveries"
            )
            .expect("Failed to register discovery_errors"),

            report_errors: register_int_counter!(
                "docker_stats_report_errors_total",
                "Total number of failed or timed out passive check submissions"
            )
            .expect("Failed to register report_errors"),

            host_status: register_int_gauge!(
                "docker_stats_host_status",
                "Last emitted host status (0 OK, 1 WARNING, 2 CRITICAL, 3 UNKNOWN)"
            )
            .expect("Failed to register host_status"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
        self.inner().cycles_total.inc();
    }

    pub fn set_containers_monitored(&self, count: i64) {
        self.inner().containers_monitored.set(count);
    }

    pub fn inc_containers_skipped(&self, count: u64) {
        self.inner().containers_skipped.inc_by(count);
    }

    pub fn inc_discovery_errors(&self) {
        self.inner().discovery_errors.inc();
    }

    pub fn inc_report_errors(&self) {
        self.inner().report_errors.inc();
    }

    pub fn set_host_status(&self, status: StatusLevel) {
        self.inner().host_status.set(status.code() as i64);
    }

    /// Poll cycles run so far, aborted ones included
    pub fn cycles_total(&self) -> u64 {
        self.inner().cycles_total.get()
    }

    pub fn report_errors_total(&self) -> u64 {
        self.inner().report_errors.get()
    }

    /// Every registered metric in the Prometheus text format
    pub fn encode_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Structured logger for agent events
///
/// Provides consistent JSON-formatted logging for cycles, host status
/// changes and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log a completed poll cycle
    pub fn log_cycle(
        &self,
        discovered: usize,
        collected: usize,
        skipped: usize,
        status: Option<StatusLevel>,
        elapsed_ms: u128,
    ) {
        info!(
            event = "cycle_completed",
            node = %self.node_name,
            discovered = discovered,
            collected = collected,
            skipped = skipped,
            status = ?status,
            elapsed_ms = elapsed_ms,
            "Poll cycle completed"
        );
    }

    /// Log a change of the aggregated host status
    pub fn log_host_status(&self, previous: Option<StatusLevel>, current: StatusLevel) {
        match current {
            StatusLevel::Ok => info!(
                event = "host_status",
                node = %self.node_name,
                previous = ?previous,
                status = %current,
                "Host status changed"
            ),
            _ => warn!(
                event = "host_status",
                node = %self.node_name,
                previous = ?previous,
                status = %current,
                "Host status changed"
            ),
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, backend: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            backend = %backend,
            "Docker stats agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Docker stats agent shutting down"
        );
    }
}
