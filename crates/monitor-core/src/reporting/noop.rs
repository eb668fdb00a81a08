use super::{Emission, ReportError, ReportingDriver};
use crate::models::{ClassifiedMetrics, StatusLevel};
use async_trait::async_trait;

/// Driver used when no backend is configured
///
/// Records nothing and always emits OK, any number of times.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

#[async_trait]
impl ReportingDriver for NoopReporter {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn reset(&mut self) {}

    fn record_container_metrics(
        &mut self,
        _container_id: &str,
        _metrics: &ClassifiedMetrics,
    ) -> Result<(), ReportError> {
        Ok(())
    }

    async fn emit(&mut self) -> Result<Emission, ReportError> {
        Ok(Emission::delivered(StatusLevel::Ok))
    }
}
