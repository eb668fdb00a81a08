//! Integration tests for the poll cycle
//!
//! These tests drive whole cycles against a scripted runtime and capture
//! the passive checks the NSCA driver would submit.

#[cfg(test)]
mod poll_cycle_tests {
    use crate::collector::{CollectError, ContainerRuntime, PollCycle, PollCycleBuilder};
    use crate::evaluate::{Limit, Limits};
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::models::{ContainerIdentity, MetricName, RawMetricSet, StatusLevel};
    use crate::observability::AgentMetrics;
    use crate::reporting::{NscaConfig, NscaReporter, PassiveCheckSink, ReportError};
    use crate::stats_log::StatsLog;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const MIB: f64 = 1024.0 * 1024.0;

    enum Step {
        Stats(RawMetricSet),
        Timeout,
    }

    /// Runtime replaying a fixed script, one entry per cycle
    #[derive(Default)]
    struct ScriptedRuntime {
        /// `None` makes discovery fail for that cycle
        listings: Mutex<VecDeque<Option<Vec<ContainerIdentity>>>>,
        stats: Mutex<HashMap<String, VecDeque<Step>>>,
        env: Vec<String>,
    }

    impl ScriptedRuntime {
        fn listing(self, ids: &[&str]) -> Self {
            let containers = ids
                .iter()
                .map(|id| ContainerIdentity::new(*id, vec![format!("{id}-svc")], "app:latest"))
                .collect();
            self.listings.lock().unwrap().push_back(Some(containers));
            self
        }

        fn failed_listing(self) -> Self {
            self.listings.lock().unwrap().push_back(None);
            self
        }

        fn step(self, id: &str, step: Step) -> Self {
            self.stats
                .lock()
                .unwrap()
                .entry(id.to_string())
                .or_default()
                .push_back(step);
            self
        }

        fn stats(self, id: &str, raw: RawMetricSet) -> Self {
            self.step(id, Step::Stats(raw))
        }
    }

    #[async_trait]
    impl ContainerRuntime for ScriptedRuntime {
        async fn list_containers(&self) -> Result<Vec<ContainerIdentity>, CollectError> {
            match self.listings.lock().unwrap().pop_front() {
                Some(Some(containers)) => Ok(containers),
                Some(None) | None => Err(CollectError::Transport(
                    "docker socket unavailable".to_string(),
                )),
            }
        }

        async fn fetch_stats(&self, container_id: &str) -> Result<RawMetricSet, CollectError> {
            let step = self
                .stats
                .lock()
                .unwrap()
                .get_mut(container_id)
                .and_then(|steps| steps.pop_front());
            match step {
                Some(Step::Stats(raw)) => Ok(raw),
                Some(Step::Timeout) => Err(CollectError::Timeout(Duration::from_secs(10))),
                None => Err(CollectError::Status {
                    status: 404,
                    body: "no such container".to_string(),
                }),
            }
        }

        async fn container_env(&self, _container_id: &str) -> Result<Vec<String>, CollectError> {
            Ok(self.env.clone())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        payloads: Mutex<Vec<String>>,
        refuse: bool,
    }

    impl RecordingSink {
        fn last(&self) -> String {
            self.payloads.lock().unwrap().last().cloned().unwrap_or_default()
        }

        fn count(&self) -> usize {
            self.payloads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PassiveCheckSink for RecordingSink {
        async fn submit(&self, payload: &str, _destination: &str) -> Result<(), ReportError> {
            self.payloads.lock().unwrap().push(payload.to_string());
            if self.refuse {
                Err(ReportError::Sink("send_nsca exited with 2: connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn limit(warning: f64, critical: f64) -> Limit {
        Limit::new(warning, critical).unwrap()
    }

    fn cycle(runtime: ScriptedRuntime, limits: Limits) -> (PollCycle, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let driver = NscaReporter::new(NscaConfig::new("nagios", "docker-host"), sink.clone());
        let cycle = PollCycleBuilder::new()
            .runtime(Arc::new(runtime))
            .driver(Box::new(driver))
            .limits(limits)
            .build()
            .unwrap();
        (cycle, sink)
    }

    fn cpu(usage: f64, system: f64) -> RawMetricSet {
        RawMetricSet::new()
            .with(MetricName::CpuUsage, usage)
            .with(MetricName::CpuSystemUsage, system)
    }

    fn network_in(bytes: f64) -> RawMetricSet {
        RawMetricSet::new().with(MetricName::NetworkIn, bytes)
    }

    #[tokio::test]
    async fn test_memory_at_critical_limit_is_critical() {
        let runtime = ScriptedRuntime::default().listing(&["abc"]).stats(
            "abc",
            RawMetricSet::new()
                .with(MetricName::MemoryUsage, 80.0 * MIB)
                .with(MetricName::MemoryLimit, 100.0 * MIB),
        );
        let limits = Limits {
            ram: limit(50.0, 80.0),
            ..Limits::default()
        };
        let (mut cycle, sink) = cycle(runtime, limits);

        let summary = cycle.run_once().await;

        assert_eq!(summary.collected, 1);
        assert_eq!(summary.status, Some(StatusLevel::Critical));
        let payload = sink.last();
        assert!(payload.starts_with("docker-host\tDocker Stats\t2\t"));
        assert!(payload.contains("CRITICAL RAM: The Container abc has level of RAM: 80.000"));
    }

    #[tokio::test]
    async fn test_cpu_percentage_from_counter_deltas() {
        let runtime = ScriptedRuntime::default()
            .listing(&["abc"])
            .listing(&["abc"])
            .stats("abc", cpu(1000.0, 10000.0))
            .stats("abc", cpu(1500.0, 10500.0));
        let limits = Limits {
            cpu: limit(30.0, 80.0),
            ..Limits::default()
        };
        let (mut cycle, sink) = cycle(runtime, limits);

        // No prior sample, so CPU is left out of the first check
        let first = cycle.run_once().await;
        assert_eq!(first.status, Some(StatusLevel::Ok));
        assert!(!sink.last().contains("CPU"));

        let second = cycle.run_once().await;
        assert_eq!(second.status, Some(StatusLevel::Critical));
        assert!(sink
            .last()
            .contains("CRITICAL CPU: The Container abc has level of CPU: 100.000"));
    }

    #[tokio::test]
    async fn test_removed_container_is_purged_and_restarts_cold() {
        let runtime = ScriptedRuntime::default()
            .listing(&["abc"])
            .listing(&[])
            .listing(&["abc"])
            .stats("abc", network_in(2048.0))
            .stats("abc", network_in(4096.0));
        let limits = Limits {
            net_in: limit(1.0, 2.0),
            ..Limits::default()
        };
        let (mut cycle, sink) = cycle(runtime, limits);

        cycle.run_once().await;
        assert_eq!(cycle.tracker().prior("abc", MetricName::NetworkIn), Some(2.0));

        let gone = cycle.run_once().await;
        assert_eq!(gone.removed, 1);
        assert!(!cycle.registry().contains("abc"));
        assert_eq!(cycle.tracker().prior("abc", MetricName::NetworkIn), None);

        // Same id again: delta restarts at zero instead of 4 - 2
        let back = cycle.run_once().await;
        assert_eq!(back.added, 1);
        assert_eq!(back.status, Some(StatusLevel::Ok));
        assert!(!sink.last().contains("has level of NETIN"));
        assert_eq!(cycle.tracker().prior("abc", MetricName::NetworkIn), Some(4.0));
    }

    #[tokio::test]
    async fn test_zero_system_counter_is_unknown() {
        let runtime = ScriptedRuntime::default()
            .listing(&["abc"])
            .listing(&["abc"])
            .stats("abc", cpu(1000.0, 0.0))
            .stats("abc", cpu(1500.0, 0.0));
        let (mut cycle, sink) = cycle(runtime, Limits::default());

        cycle.run_once().await;
        let summary = cycle.run_once().await;

        assert_eq!(summary.collected, 1);
        assert_eq!(summary.status, Some(StatusLevel::Ok));
        assert!(sink.last().contains("UNKNOWN CPU: The Container abc could not compute CPU"));
    }

    #[tokio::test]
    async fn test_timed_out_fetch_skips_without_eviction() {
        let runtime = ScriptedRuntime::default()
            .listing(&["abc"])
            .listing(&["abc"])
            .listing(&["abc"])
            .stats("abc", network_in(1024.0))
            .step("abc", Step::Timeout)
            .stats("abc", network_in(3072.0));
        let limits = Limits {
            net_in: limit(1.0, 2.0),
            ..Limits::default()
        };
        let (mut cycle, sink) = cycle(runtime, limits);

        cycle.run_once().await;

        let skipped = cycle.run_once().await;
        assert_eq!(skipped.skipped, 1);
        assert_eq!(skipped.collected, 0);
        assert_eq!(skipped.status, Some(StatusLevel::Ok));
        assert!(cycle.registry().contains("abc"));
        assert_eq!(cycle.tracker().prior("abc", MetricName::NetworkIn), Some(1.0));

        // Delta is taken against the last successful sample
        let resumed = cycle.run_once().await;
        assert_eq!(resumed.status, Some(StatusLevel::Critical));
        assert!(sink
            .last()
            .contains("CRITICAL NETIN: The Container abc has level of NETIN: 2.000"));
    }

    #[tokio::test]
    async fn test_discovery_failure_keeps_registry() {
        let runtime = ScriptedRuntime::default()
            .listing(&["abc", "def"])
            .failed_listing()
            .stats("abc", network_in(0.0))
            .stats("def", network_in(0.0));
        let sink = Arc::new(RecordingSink::default());
        let health = HealthRegistry::for_poll_loop().await;
        let metrics = AgentMetrics::new();
        let mut cycle = PollCycleBuilder::new()
            .runtime(Arc::new(runtime))
            .driver(Box::new(NscaReporter::new(
                NscaConfig::new("nagios", "docker-host"),
                sink.clone(),
            )))
            .health(health.clone())
            .metrics(metrics.clone())
            .build()
            .unwrap();

        let first = cycle.run_once().await;
        assert_eq!(first.collected, 2);
        assert_eq!(sink.count(), 1);

        let cycles_before = metrics.cycles_total();
        let failed = cycle.run_once().await;
        assert_eq!(failed.status, None);
        assert!(!failed.delivered);
        assert_eq!(cycle.registry().len(), 2);
        assert_eq!(sink.count(), 1);

        // aborted cycles are still counted
        assert!(metrics.cycles_total() > cycles_before);

        let report = health.health().await;
        assert_eq!(
            report.components[components::DISCOVERY].status,
            ComponentStatus::Unhealthy
        );
        assert_eq!(report.cycles_completed, 1);
    }

    #[tokio::test]
    async fn test_failed_submissions_degrade_then_fail_reporter() {
        let runtime = ScriptedRuntime::default()
            .listing(&["abc"])
            .listing(&["abc"])
            .listing(&["abc"])
            .stats("abc", network_in(0.0))
            .stats("abc", network_in(0.0))
            .stats("abc", network_in(0.0));
        let sink = Arc::new(RecordingSink {
            refuse: true,
            ..Default::default()
        });
        let health = HealthRegistry::for_poll_loop().await;
        let metrics = AgentMetrics::new();
        let mut cycle = PollCycleBuilder::new()
            .runtime(Arc::new(runtime))
            .driver(Box::new(NscaReporter::new(
                NscaConfig::new("nagios", "docker-host"),
                sink.clone(),
            )))
            .health(health.clone())
            .metrics(metrics.clone())
            .build()
            .unwrap();
        let errors_before = metrics.report_errors_total();

        let first = cycle.run_once().await;
        assert_eq!(first.status, Some(StatusLevel::Ok));
        assert!(!first.delivered);
        let reporter = health.health().await.components[components::REPORTER].clone();
        assert_eq!(reporter.status, ComponentStatus::Degraded);
        assert_eq!(
            reporter.last_error.as_deref(),
            Some("passive check submission failed: send_nsca exited with 2: connection refused")
        );

        cycle.run_once().await;
        cycle.run_once().await;
        let report = health.health().await;
        assert_eq!(
            report.components[components::REPORTER].status,
            ComponentStatus::Unhealthy
        );
        assert_eq!(report.components[components::REPORTER].consecutive_failures, 3);
        assert!(metrics.report_errors_total() >= errors_before + 3);
        // one attempt per cycle, never retried
        assert_eq!(sink.count(), 3);
    }

    #[tokio::test]
    async fn test_stats_log_line_per_container() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("docker-stats.log");
        let runtime = ScriptedRuntime {
            env: vec!["APP_ENV=prod".to_string()],
            ..ScriptedRuntime::default()
        }
        .listing(&["abc", "def"])
        .stats(
            "abc",
            RawMetricSet::new()
                .with(MetricName::MemoryUsage, 10.0 * MIB)
                .with(MetricName::MemoryLimit, 100.0 * MIB),
        )
        .step("def", Step::Timeout);

        let mut cycle = PollCycleBuilder::new()
            .runtime(Arc::new(runtime))
            .stats_log(StatsLog::new(&log_path))
            .log_container_env(true)
            .build()
            .unwrap();

        let summary = cycle.run_once().await;
        assert_eq!(summary.collected, 1);
        assert_eq!(summary.skipped, 1);

        let contents = tokio::fs::read_to_string(&log_path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(
            "containerId=abc containerImg=app:latest containerName=abc-svc APP_ENV=prod"
        ));
        assert!(lines[0].contains("memory_percentage_usage=10.000%"));
    }
}
