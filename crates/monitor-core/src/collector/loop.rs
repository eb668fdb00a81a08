//! Poll cycle orchestration
//!
//! One cycle runs discovery, fetches stats for every live container,
//! differences counters, classifies resources, writes the stats log and
//! hands the results to the reporting driver, which emits once at the end.

use super::{discover_containers, CollectError, ContainerRegistry, ContainerRuntime, DeltaTracker};
use crate::evaluate::{Limits, ThresholdEvaluator};
use crate::health::{components, HealthRegistry};
use crate::models::{
    ClassifiedMetrics, ContainerIdentity, CycleValues, MetricName, MetricSnapshot, Resource,
    StatusLevel,
};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::reporting::{Emission, NoopReporter, ReportError, ReportingDriver};
use crate::stats_log::{StatsLine, StatsLog};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default pause between cycles
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// What happened during one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    /// Containers reported by discovery
    pub discovered: usize,
    /// Containers that appeared since the previous cycle
    pub added: usize,
    /// Containers that disappeared since the previous cycle
    pub removed: usize,
    /// Containers whose stats were fetched and evaluated
    pub collected: usize,
    /// Containers skipped after a failed fetch
    pub skipped: usize,
    /// Emitted host status, `None` when the cycle aborted before emitting
    pub status: Option<StatusLevel>,
    /// Whether the emitted status reached the backend
    pub delivered: bool,
}

/// Evaluated resources of one container
struct Collected {
    classified: ClassifiedMetrics,
    /// No earlier sample existed to difference against
    first_sample: bool,
}

impl Collected {
    /// Resources handed to the reporting driver
    ///
    /// CPU of a container's first sample has no baseline yet and is left
    /// out instead of being reported as UNKNOWN.
    fn reportable(mut self) -> ClassifiedMetrics {
        let cpu_unknown = self
            .classified
            .get(&Resource::Cpu)
            .is_some_and(|metric| metric.status == StatusLevel::Unknown);
        if self.first_sample && cpu_unknown {
            self.classified.remove(&Resource::Cpu);
        }
        self.classified
    }
}

/// Periodic orchestrator driving every component once per tick
pub struct PollCycle {
    runtime: Arc<dyn ContainerRuntime>,
    registry: ContainerRegistry,
    tracker: DeltaTracker,
    evaluator: ThresholdEvaluator,
    driver: Box<dyn ReportingDriver>,
    stats_log: Option<StatsLog>,
    metrics: Option<AgentMetrics>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    log_container_env: bool,
    interval: Duration,
    last_status: Option<StatusLevel>,
}

impl PollCycle {
    pub fn registry(&self) -> &ContainerRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &DeltaTracker {
        &self.tracker
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run cycles until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            backend = self.driver.name(),
            "Starting poll loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let summary = self.run_once().await;
                    let elapsed_ms = start.elapsed().as_millis();
                    match &self.logger {
                        Some(logger) => logger.log_cycle(
                            summary.discovered,
                            summary.collected,
                            summary.skipped,
                            summary.status,
                            elapsed_ms,
                        ),
                        None => debug!(
                            discovered = summary.discovered,
                            collected = summary.collected,
                            skipped = summary.skipped,
                            status = ?summary.status,
                            elapsed_ms = elapsed_ms,
                            "Poll cycle complete"
                        ),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down poll loop");
                    break;
                }
            }
        }
    }

    /// Run a single cycle
    pub async fn run_once(&mut self) -> CycleSummary {
        let start = Instant::now();
        let mut summary = CycleSummary::default();

        let (live, outcome) =
            match discover_containers(self.runtime.as_ref(), &self.registry).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Container discovery failed, skipping cycle");
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_discovery_errors();
                        metrics.observe_cycle_latency(start.elapsed().as_secs_f64());
                    }
                    if let Some(health) = &self.health {
                        health.record_failure(components::DISCOVERY, e.to_string()).await;
                    }
                    return summary;
                }
            };
        if let Some(health) = &self.health {
            health.record_success(components::DISCOVERY).await;
        }

        summary.discovered = live.len();
        summary.added = outcome.added.len();
        summary.removed = outcome.removed.len();

        for container in &outcome.added {
            info!(container_id = %container.id, name = container.display_name(), "Container added");
        }
        for container in &outcome.removed {
            self.tracker.purge(&container.id);
            info!(container_id = %container.id, name = container.display_name(), "Container removed");
        }

        self.driver.reset();

        for container in self.registry.list() {
            match self.collect_container(&container).await {
                Ok(collected) => {
                    summary.collected += 1;
                    let classified = collected.reportable();
                    if let Err(e) = self.driver.record_container_metrics(&container.id, &classified)
                    {
                        warn!(container_id = %container.id, error = %e, "Failed to record container metrics");
                    }
                }
                Err(e) => {
                    summary.skipped += 1;
                    match &e {
                        CollectError::Timeout(_) => warn!(
                            container_id = %container.id,
                            error = %e,
                            "Stats fetch timed out, skipping container"
                        ),
                        _ => debug!(
                            container_id = %container.id,
                            error = %e,
                            "Failed to collect container stats"
                        ),
                    }
                }
            }
        }

        match self.driver.emit().await {
            Ok(Emission {
                level,
                submit_error,
            }) => {
                summary.status = Some(level);
                if self.last_status != Some(level) {
                    match &self.logger {
                        Some(logger) => logger.log_host_status(self.last_status, level),
                        None => info!(previous = ?self.last_status, status = %level, "Host status changed"),
                    }
                    self.last_status = Some(level);
                }
                match submit_error {
                    None => {
                        summary.delivered = true;
                        if let Some(health) = &self.health {
                            health.record_success(components::REPORTER).await;
                        }
                    }
                    Some(e) => self.record_report_error(&e).await,
                }
            }
            Err(e) => {
                warn!(backend = self.driver.name(), error = %e, "Failed to emit host status");
                self.record_report_error(&e).await;
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.observe_cycle_latency(start.elapsed().as_secs_f64());
            metrics.set_containers_monitored(self.registry.len() as i64);
            metrics.inc_containers_skipped(summary.skipped as u64);
            if let Some(level) = summary.status {
                metrics.set_host_status(level);
            }
        }
        if let Some(health) = &self.health {
            health.record_cycle().await;
        }

        summary
    }

    async fn record_report_error(&self, error: &ReportError) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_report_errors();
        }
        if let Some(health) = &self.health {
            health
                .record_failure(components::REPORTER, error.to_string())
                .await;
        }
    }

    /// Fetch, difference, classify and log one container
    async fn collect_container(
        &self,
        container: &ContainerIdentity,
    ) -> Result<Collected, CollectError> {
        let raw = self.runtime.fetch_stats(&container.id).await?;
        let snapshot = MetricSnapshot::from_raw(&raw);
        let first_sample = snapshot.get(MetricName::CpuSystemUsage).is_some()
            && self
                .tracker
                .prior(&container.id, MetricName::CpuSystemUsage)
                .is_none();

        let values: CycleValues = snapshot
            .iter()
            .map(|(metric, sample)| {
                let value = self
                    .tracker
                    .delta(&container.id, metric, sample.value, sample.kind);
                (metric, value)
            })
            .collect();

        let classified = self.evaluator.evaluate(&snapshot, &values);

        if let Some(stats_log) = &self.stats_log {
            let env = self.container_env(&container.id).await;
            let line = StatsLine {
                container,
                env: &env,
                values: &values,
                classified: &classified,
            };
            if let Err(e) = stats_log.append(&line).await {
                warn!(error = %e, "Failed to write stats log");
            }
        }

        Ok(Collected {
            classified,
            first_sample,
        })
    }

    async fn container_env(&self, container_id: &str) -> Vec<String> {
        if !self.log_container_env {
            return Vec::new();
        }
        match self.runtime.container_env(container_id).await {
            Ok(env) => env,
            Err(e) => {
                debug!(container_id = %container_id, error = %e, "Failed to read container env");
                Vec::new()
            }
        }
    }
}

/// Builder for the poll cycle
pub struct PollCycleBuilder {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    driver: Option<Box<dyn ReportingDriver>>,
    limits: Limits,
    stats_log: Option<StatsLog>,
    metrics: Option<AgentMetrics>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    log_container_env: bool,
    interval: Duration,
}

impl PollCycleBuilder {
    pub fn new() -> Self {
        Self {
            runtime: None,
            driver: None,
            limits: Limits::default(),
            stats_log: None,
            metrics: None,
            health: None,
            logger: None,
            log_container_env: false,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Set the container runtime
    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the reporting driver (defaults to the no-op backend)
    pub fn driver(mut self, driver: Box<dyn ReportingDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn stats_log(mut self, stats_log: StatsLog) -> Self {
        self.stats_log = Some(stats_log);
        self
    }

    pub fn metrics(mut self, metrics: AgentMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Include container env vars in stats log lines
    pub fn log_container_env(mut self, enabled: bool) -> Self {
        self.log_container_env = enabled;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn build(self) -> Result<PollCycle> {
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Container runtime is required"))?;
        if self.interval.is_zero() {
            anyhow::bail!("Poll interval must be greater than zero");
        }

        Ok(PollCycle {
            runtime,
            registry: ContainerRegistry::new(),
            tracker: DeltaTracker::new(),
            evaluator: ThresholdEvaluator::new(self.limits),
            driver: self.driver.unwrap_or_else(|| Box::new(NoopReporter)),
            stats_log: self.stats_log,
            metrics: self.metrics,
            health: self.health,
            logger: self.logger,
            log_container_env: self.log_container_env,
            interval: self.interval,
            last_status: None,
        })
    }
}

impl Default for PollCycleBuilder {
    fn default() -> Self {
        Self::new()
    }
}
