//! Threshold classification
//!
//! Turns per-cycle metric values into one status per resource. Ratios whose
//! denominator is zero or negative, and any non-finite value, are reported
//! as UNKNOWN instead of being compared.

use super::{Limit, Limits};
use crate::models::{
    ClassifiedMetric, ClassifiedMetrics, CycleValues, MetricName, MetricSnapshot, Resource,
    StatusLevel,
};

/// Classify `value` against `limit`
pub fn classify(value: f64, limit: Limit) -> StatusLevel {
    if !value.is_finite() {
        return StatusLevel::Unknown;
    }

    if value >= limit.critical() {
        StatusLevel::Critical
    } else if value >= limit.warning() {
        StatusLevel::Warning
    } else {
        StatusLevel::Ok
    }
}

/// Classify a value that may not have been computable
pub fn classify_reading(reading: Option<f64>, limit: Limit) -> StatusLevel {
    match reading {
        Some(value) => classify(value, limit),
        None => StatusLevel::Unknown,
    }
}

/// `numerator / denominator * 100`, or `None` when undefined
pub fn percentage(numerator: f64, denominator: f64) -> Option<f64> {
    if !numerator.is_finite() || !denominator.is_finite() || denominator <= 0.0 {
        return None;
    }

    let ratio = numerator / denominator * 100.0;
    ratio.is_finite().then_some(ratio)
}

/// Evaluates resource readings against per-resource limits
#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    limits: Limits,
}

impl ThresholdEvaluator {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Derive the value of every resource from one cycle's metrics
    ///
    /// CPU is the container's share of system CPU time elapsed since the
    /// previous poll, so it is undefined on a container's first cycle and
    /// whenever the system counter reads zero.
    pub fn readings(snapshot: &MetricSnapshot, values: &CycleValues) -> Vec<(Resource, Option<f64>)> {
        let value = |metric: MetricName| values.get(&metric).copied();

        let system_counter_zero = snapshot
            .get(MetricName::CpuSystemUsage)
            .map(|sample| sample.value == 0.0)
            .unwrap_or(true);

        let cpu = if system_counter_zero {
            None
        } else {
            match (value(MetricName::CpuUsage), value(MetricName::CpuSystemUsage)) {
                (Some(cpu), Some(system)) => percentage(cpu, system),
                _ => None,
            }
        };

        let ram = match (value(MetricName::MemoryUsage), value(MetricName::MemoryLimit)) {
            (Some(usage), Some(limit)) => percentage(usage, limit),
            _ => None,
        };

        vec![
            (Resource::Cpu, cpu),
            (Resource::Ram, ram),
            (Resource::NetIn, value(MetricName::NetworkIn)),
            (Resource::NetOut, value(MetricName::NetworkOut)),
            (Resource::Disk, value(MetricName::DiskRead)),
        ]
    }

    /// Classify every resource of one container
    pub fn evaluate(&self, snapshot: &MetricSnapshot, values: &CycleValues) -> ClassifiedMetrics {
        Self::readings(snapshot, values)
            .into_iter()
            .map(|(resource, reading)| {
                let status = classify_reading(reading, self.limits.for_resource(resource));
                let value = reading.filter(|v| v.is_finite());
                (resource, ClassifiedMetric { status, value })
            })
            .collect()
    }
}
