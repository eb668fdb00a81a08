//! Nagios passive checks over NSCA
//!
//! Handles:
//! - Building one status message per non-OK resource
//! - Aggregating the cycle into a host status
//! - Formatting the `send_nsca` payload and submitting it

use super::{Emission, ReportError, ReportingDriver};
use crate::evaluate::{aggregate, ContainerStatuses};
use crate::models::{ClassifiedMetric, ClassifiedMetrics, HostStatusReport, Resource, StatusLevel};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Service description reported to Nagios
pub const DEFAULT_SERVICE_DESCRIPTION: &str = "Docker Stats";

/// Default location of the NSCA client
const DEFAULT_SEND_NSCA_PATH: &str = "/usr/sbin/send_nsca";

/// Default time allowed for one submission
const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 10;

/// Message used when every resource is OK
const ALL_OK_MESSAGE: &str = "OK: Everything is OK";

/// Settings for the NSCA backend
#[derive(Debug, Clone, PartialEq)]
pub struct NscaConfig {
    /// Nagios server receiving passive checks
    pub server: String,
    /// Host name the check is reported for
    pub hostname: String,
    pub service_description: String,
    pub send_nsca_path: PathBuf,
    /// Optional `send_nsca.cfg` passed with `-c`
    pub send_nsca_config: Option<PathBuf>,
    pub submit_timeout: Duration,
}

impl NscaConfig {
    pub fn new(server: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            hostname: hostname.into(),
            service_description: DEFAULT_SERVICE_DESCRIPTION.to_string(),
            send_nsca_path: PathBuf::from(DEFAULT_SEND_NSCA_PATH),
            send_nsca_config: None,
            submit_timeout: Duration::from_secs(DEFAULT_SUBMIT_TIMEOUT_SECS),
        }
    }
}

/// Mechanism that delivers a formatted passive check
#[async_trait]
pub trait PassiveCheckSink: Send + Sync {
    async fn submit(&self, payload: &str, destination: &str) -> Result<(), ReportError>;
}

/// Submits passive checks by piping them into `send_nsca`
#[derive(Debug, Clone)]
pub struct SendNscaSink {
    program: PathBuf,
    config_file: Option<PathBuf>,
    timeout: Duration,
}

impl SendNscaSink {
    pub fn new(program: impl Into<PathBuf>, config_file: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            config_file,
            timeout,
        }
    }

    pub fn from_config(config: &NscaConfig) -> Self {
        Self::new(
            config.send_nsca_path.clone(),
            config.send_nsca_config.clone(),
            config.submit_timeout,
        )
    }

    async fn run(&self, payload: &str, destination: &str) -> Result<(), ReportError> {
        let mut command = Command::new(&self.program);
        command.arg("-H").arg(destination);
        if let Some(ref config_file) = self.config_file {
            command.arg("-c").arg(config_file);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ReportError::Sink(format!("failed to spawn {}: {}", self.program.display(), e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| ReportError::Sink(format!("failed to write payload: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ReportError::Sink(format!("failed to wait for send_nsca: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(output = %stdout.trim(), "send_nsca output");
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(ReportError::Sink(format!(
                "send_nsca exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl PassiveCheckSink for SendNscaSink {
    async fn submit(&self, payload: &str, destination: &str) -> Result<(), ReportError> {
        tokio::time::timeout(self.timeout, self.run(payload, destination))
            .await
            .map_err(|_| ReportError::SinkTimeout(self.timeout))?
    }
}

/// Human-readable line for a non-OK resource, `None` when OK
pub fn resource_message(
    container_id: &str,
    resource: Resource,
    metric: &ClassifiedMetric,
) -> Option<String> {
    match (metric.status, metric.value) {
        (StatusLevel::Ok, _) => None,
        (StatusLevel::Unknown, _) | (_, None) => Some(format!(
            "UNKNOWN {resource}: The Container {container_id} could not compute {resource}"
        )),
        (status, Some(value)) => Some(format!(
            "{status} {resource}: The Container {container_id} has level of {resource}: {value:.3}"
        )),
    }
}

/// `{hostname}\t{service}\t{code}\t{message}\n` as read by `send_nsca`
pub fn format_payload(report: &HostStatusReport, service_description: &str) -> String {
    let message = if report.messages.is_empty() {
        ALL_OK_MESSAGE.to_string()
    } else {
        report.messages.join("::")
    };

    format!(
        "{}\t{}\t{}\t{}\n",
        report.hostname,
        service_description,
        report.level.code(),
        message
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleState {
    Idle,
    Open,
    Emitted,
}

/// Active backend submitting one passive check per cycle
pub struct NscaReporter {
    config: NscaConfig,
    sink: Arc<dyn PassiveCheckSink>,
    statuses: ContainerStatuses,
    messages: Vec<String>,
    state: CycleState,
}

impl NscaReporter {
    pub fn new(config: NscaConfig, sink: Arc<dyn PassiveCheckSink>) -> Self {
        Self {
            config,
            sink,
            statuses: ContainerStatuses::new(),
            messages: Vec::new(),
            state: CycleState::Idle,
        }
    }

    pub fn config(&self) -> &NscaConfig {
        &self.config
    }

    /// Aggregated status of the current cycle
    pub fn report(&self) -> Result<HostStatusReport, ReportError> {
        match self.state {
            CycleState::Idle => Err(ReportError::CycleNotOpen),
            CycleState::Open | CycleState::Emitted => Ok(HostStatusReport {
                level: aggregate(&self.statuses),
                messages: self.messages.clone(),
                hostname: self.config.hostname.clone(),
            }),
        }
    }
}

#[async_trait]
impl ReportingDriver for NscaReporter {
    fn name(&self) -> &'static str {
        "nsca"
    }

    fn reset(&mut self) {
        self.statuses.clear();
        self.messages.clear();
        self.state = CycleState::Open;
    }

    fn record_container_metrics(
        &mut self,
        container_id: &str,
        metrics: &ClassifiedMetrics,
    ) -> Result<(), ReportError> {
        match self.state {
            CycleState::Idle => return Err(ReportError::CycleNotOpen),
            CycleState::Emitted => return Err(ReportError::AlreadyEmitted),
            CycleState::Open => {}
        }

        for (resource, metric) in metrics {
            self.statuses.set(container_id, *resource, metric.status);
            if let Some(message) = resource_message(container_id, *resource, metric) {
                self.messages.push(message);
            }
        }

        Ok(())
    }

    async fn emit(&mut self) -> Result<Emission, ReportError> {
        match self.state {
            CycleState::Idle => return Err(ReportError::CycleNotOpen),
            CycleState::Emitted => return Err(ReportError::AlreadyEmitted),
            CycleState::Open => {}
        }

        let report = self.report()?;
        let payload = format_payload(&report, &self.config.service_description);
        self.state = CycleState::Emitted;

        match self.sink.submit(&payload, &self.config.server).await {
            Ok(()) => {
                info!(
                    server = %self.config.server,
                    status = %report.level,
                    messages = report.messages.len(),
                    "Submitted passive check"
                );
                Ok(Emission::delivered(report.level))
            }
            Err(e) => {
                warn!(
                    server = %self.config.server,
                    status = %report.level,
                    error = %e,
                    "Failed to submit passive check"
                );
                Ok(Emission::undelivered(report.level, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records submissions instead of running send_nsca
    #[derive(Default)]
    struct RecordingSink {
        submissions: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl PassiveCheckSink for RecordingSink {
        async fn submit(&self, payload: &str, destination: &str) -> Result<(), ReportError> {
            self.submissions
                .lock()
                .unwrap()
                .push((payload.to_string(), destination.to_string()));
            if self.fail {
                Err(ReportError::Sink("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn metric(status: StatusLevel, value: Option<f64>) -> ClassifiedMetric {
        ClassifiedMetric { status, value }
    }

    fn reporter(sink: Arc<RecordingSink>) -> NscaReporter {
        NscaReporter::new(NscaConfig::new("nagios.local", "docker-host"), sink)
    }

    #[test]
    fn test_resource_message_formats() {
        assert_eq!(
            resource_message("abc", Resource::Ram, &metric(StatusLevel::Ok, Some(1.0))),
            None
        );
        assert_eq!(
            resource_message("abc", Resource::Ram, &metric(StatusLevel::Critical, Some(80.0)))
                .unwrap(),
            "CRITICAL RAM: The Container abc has level of RAM: 80.000"
        );
        assert_eq!(
            resource_message("abc", Resource::Cpu, &metric(StatusLevel::Unknown, None)).unwrap(),
            "UNKNOWN CPU: The Container abc could not compute CPU"
        );
    }

    #[test]
    fn test_format_payload() {
        let ok = HostStatusReport {
            level: StatusLevel::Ok,
            messages: vec![],
            hostname: "docker-host".to_string(),
        };
        assert_eq!(
            format_payload(&ok, DEFAULT_SERVICE_DESCRIPTION),
            "docker-host\tDocker Stats\t0\tOK: Everything is OK\n"
        );

        let warning = HostStatusReport {
            level: StatusLevel::Warning,
            messages: vec!["first".to_string(), "second".to_string()],
            hostname: "docker-host".to_string(),
        };
        assert_eq!(
            format_payload(&warning, "Containers"),
            "docker-host\tContainers\t1\tfirst::second\n"
        );
    }

    #[tokio::test]
    async fn test_cycle_submits_worst_status() {
        let sink = Arc::new(RecordingSink::default());
        let mut driver = reporter(sink.clone());

        let mut a = ClassifiedMetrics::new();
        a.insert(Resource::Cpu, metric(StatusLevel::Warning, Some(55.0)));
        a.insert(Resource::Ram, metric(StatusLevel::Ok, Some(10.0)));
        let mut b = ClassifiedMetrics::new();
        b.insert(Resource::Ram, metric(StatusLevel::Critical, Some(95.5)));
        b.insert(Resource::Cpu, metric(StatusLevel::Unknown, None));

        driver.reset();
        driver.record_container_metrics("a", &a).unwrap();
        driver.record_container_metrics("b", &b).unwrap();
        let status = driver.emit().await.unwrap().level;

        assert_eq!(status, StatusLevel::Critical);
        let submissions = sink.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        let (payload, destination) = &submissions[0];
        assert_eq!(destination, "nagios.local");
        assert_eq!(
            payload,
            "docker-host\tDocker Stats\t2\t\
             WARNING CPU: The Container a has level of CPU: 55.000::\
             UNKNOWN CPU: The Container b could not compute CPU::\
             CRITICAL RAM: The Container b has level of RAM: 95.500\n"
        );
    }

    #[tokio::test]
    async fn test_unknown_only_reports_ok_with_message() {
        let sink = Arc::new(RecordingSink::default());
        let mut driver = reporter(sink.clone());

        let mut a = ClassifiedMetrics::new();
        a.insert(Resource::Cpu, metric(StatusLevel::Unknown, None));

        driver.reset();
        driver.record_container_metrics("a", &a).unwrap();
        let report = driver.report().unwrap();
        assert_eq!(report.level, StatusLevel::Ok);
        assert_eq!(report.messages.len(), 1);

        assert_eq!(driver.emit().await.unwrap().level, StatusLevel::Ok);
    }

    #[tokio::test]
    async fn test_requires_reset_before_use() {
        let sink = Arc::new(RecordingSink::default());
        let mut driver = reporter(sink.clone());

        assert!(matches!(driver.report(), Err(ReportError::CycleNotOpen)));
        assert!(matches!(
            driver.record_container_metrics("a", &ClassifiedMetrics::new()),
            Err(ReportError::CycleNotOpen)
        ));
        assert!(matches!(driver.emit().await, Err(ReportError::CycleNotOpen)));
        assert!(sink.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emit_at_most_once_per_reset() {
        let sink = Arc::new(RecordingSink::default());
        let mut driver = reporter(sink.clone());

        driver.reset();
        assert_eq!(driver.emit().await.unwrap().level, StatusLevel::Ok);
        assert!(matches!(driver.emit().await, Err(ReportError::AlreadyEmitted)));
        assert_eq!(sink.submissions.lock().unwrap().len(), 1);

        driver.reset();
        driver.emit().await.unwrap();
        assert_eq!(sink.submissions.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_discards_previous_cycle() {
        let sink = Arc::new(RecordingSink::default());
        let mut driver = reporter(sink.clone());

        let mut a = ClassifiedMetrics::new();
        a.insert(Resource::Disk, metric(StatusLevel::Critical, Some(900.0)));

        driver.reset();
        driver.record_container_metrics("a", &a).unwrap();
        driver.emit().await.unwrap();

        driver.reset();
        assert_eq!(driver.emit().await.unwrap().level, StatusLevel::Ok);
        let submissions = sink.submissions.lock().unwrap();
        assert!(submissions[1].0.ends_with("\t0\tOK: Everything is OK\n"));
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_status() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let mut driver = reporter(sink.clone());

        let mut a = ClassifiedMetrics::new();
        a.insert(Resource::NetIn, metric(StatusLevel::Warning, Some(20_000.0)));

        driver.reset();
        driver.record_container_metrics("a", &a).unwrap();

        let emission = driver.emit().await.unwrap();
        assert_eq!(emission.level, StatusLevel::Warning);
        assert!(!emission.is_delivered());
        assert!(matches!(emission.submit_error, Some(ReportError::Sink(_))));
        assert_eq!(sink.submissions.lock().unwrap().len(), 1);

        // no retry within the cycle
        assert!(matches!(driver.emit().await, Err(ReportError::AlreadyEmitted)));
        assert_eq!(sink.submissions.lock().unwrap().len(), 1);
    }

    /// Write an executable stand-in for send_nsca into `dir`
    fn fake_send_nsca(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("send_nsca");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_send_nsca_sink_passes_args_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().display().to_string();
        let program = fake_send_nsca(
            dir.path(),
            &format!("printf '%s\\n' \"$@\" > {out}/args\ncat > {out}/stdin\nexit 0"),
        );
        let sink = SendNscaSink::new(
            program,
            Some(PathBuf::from("/etc/nagios/send_nsca.cfg")),
            Duration::from_secs(5),
        );

        let payload = "docker-host\tDocker Stats\t0\tOK: Everything is OK\n";
        sink.submit(payload, "nagios.local").await.unwrap();

        let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
        assert_eq!(args, "-H\nnagios.local\n-c\n/etc/nagios/send_nsca.cfg\n");
        let stdin = std::fs::read_to_string(dir.path().join("stdin")).unwrap();
        assert_eq!(stdin, payload);
    }

    #[tokio::test]
    async fn test_send_nsca_sink_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().display().to_string();
        let program = fake_send_nsca(
            dir.path(),
            &format!("printf '%s\\n' \"$@\" > {out}/args\ncat > /dev/null"),
        );
        let sink = SendNscaSink::new(program, None, Duration::from_secs(5));

        sink.submit("payload\n", "10.0.0.5").await.unwrap();

        let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
        assert_eq!(args, "-H\n10.0.0.5\n");
    }

    #[tokio::test]
    async fn test_send_nsca_sink_non_zero_exit_is_sink_error() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_send_nsca(
            dir.path(),
            "cat > /dev/null\necho 'Error: Could not connect to host nagios.local' >&2\nexit 2",
        );
        let sink = SendNscaSink::new(program, None, Duration::from_secs(5));

        let result = sink.submit("payload\n", "nagios.local").await;

        match result {
            Err(ReportError::Sink(message)) => {
                assert!(message.contains("Could not connect to host nagios.local"));
            }
            other => panic!("expected sink error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_nsca_sink_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_send_nsca(dir.path(), "exec sleep 5");
        let sink = SendNscaSink::new(program, None, Duration::from_millis(100));

        let result = sink.submit("payload\n", "nagios.local").await;

        assert!(matches!(
            result,
            Err(ReportError::SinkTimeout(t)) if t == Duration::from_millis(100)
        ));
    }

    #[tokio::test]
    async fn test_send_nsca_sink_reports_missing_program() {
        let sink = SendNscaSink::new(
            "/nonexistent/send_nsca",
            None,
            Duration::from_secs(1),
        );

        let result = sink.submit("payload\n", "nagios.local").await;

        assert!(matches!(result, Err(ReportError::Sink(_))));
    }
}
