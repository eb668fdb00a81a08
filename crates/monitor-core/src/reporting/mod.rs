//! Status reporting to the alerting backend
//!
//! A reporting driver accumulates per-container results over one poll cycle
//! and emits a single host status at the end of it:
//!
//! `reset() -> record_container_metrics()* -> emit()`
//!
//! The backend is chosen once at startup from [`ReporterConfig`].

mod noop;
mod nsca;

pub use noop::NoopReporter;
pub use nsca::{
    format_payload, resource_message, NscaConfig, NscaReporter, PassiveCheckSink, SendNscaSink,
    DEFAULT_SERVICE_DESCRIPTION,
};

use crate::models::{ClassifiedMetrics, StatusLevel};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("no open reporting cycle, call reset() first")]
    CycleNotOpen,

    #[error("status already emitted for this cycle")]
    AlreadyEmitted,

    #[error("passive check submission failed: {0}")]
    Sink(String),

    #[error("passive check submission timed out after {0:?}")]
    SinkTimeout(Duration),
}

/// Result of closing a cycle
///
/// The level is final once emitted, even when delivery failed. Failed
/// submissions are not retried.
#[derive(Debug)]
pub struct Emission {
    pub level: StatusLevel,
    pub submit_error: Option<ReportError>,
}

impl Emission {
    pub fn delivered(level: StatusLevel) -> Self {
        Self {
            level,
            submit_error: None,
        }
    }

    pub fn undelivered(level: StatusLevel, error: ReportError) -> Self {
        Self {
            level,
            submit_error: Some(error),
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.submit_error.is_none()
    }
}

/// Backend that receives evaluated container metrics
#[async_trait]
pub trait ReportingDriver: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Start a new cycle, discarding everything recorded before
    fn reset(&mut self);

    /// Record the evaluated resources of one container
    fn record_container_metrics(
        &mut self,
        container_id: &str,
        metrics: &ClassifiedMetrics,
    ) -> Result<(), ReportError>;

    /// Aggregate the cycle and hand the result to the backend
    ///
    /// `Err` means the driver was misused; delivery failures are carried in
    /// the returned [`Emission`].
    async fn emit(&mut self) -> Result<Emission, ReportError>;
}

/// Reporting backend selection
#[derive(Debug, Clone, Default)]
pub enum ReporterConfig {
    /// Submit passive checks to Nagios through `send_nsca`
    Nsca(NscaConfig),
    /// No backend configured
    #[default]
    Disabled,
}

/// Build the driver for the configured backend
pub fn build_driver(config: ReporterConfig) -> Box<dyn ReportingDriver> {
    match config {
        ReporterConfig::Nsca(config) => {
            let sink = Arc::new(SendNscaSink::from_config(&config));
            Box::new(NscaReporter::new(config, sink))
        }
        ReporterConfig::Disabled => Box::new(NoopReporter),
    }
}
