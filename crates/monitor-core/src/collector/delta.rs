//! Counter differencing across poll cycles
//!
//! Counters are cumulative totals, so a single read carries no signal. The
//! tracker keeps the previous raw value per container and metric and turns
//! each new read into the increase since the last poll.

use crate::models::{MetricKind, MetricName};
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::trace;

/// Previous raw counter values, keyed by container id then metric
#[derive(Debug, Default)]
pub struct DeltaTracker {
    previous: DashMap<String, HashMap<MetricName, f64>>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the per-cycle value of `metric` for `container_id`
    ///
    /// Gauges pass through untouched. Counters return 0 on the first
    /// observation and `raw - previous` afterwards; either way `raw` becomes
    /// the new baseline. Counter resets are not corrected and yield a
    /// negative delta.
    pub fn delta(&self, container_id: &str, metric: MetricName, raw: f64, kind: MetricKind) -> f64 {
        if kind == MetricKind::Gauge {
            return raw;
        }

        let mut entry = self.previous.entry(container_id.to_string()).or_default();
        match entry.insert(metric, raw) {
            Some(prior) => raw - prior,
            None => {
                trace!(container_id = %container_id, metric = %metric, "Cold start, establishing baseline");
                0.0
            }
        }
    }

    /// Last raw value seen for a counter
    pub fn prior(&self, container_id: &str, metric: MetricName) -> Option<f64> {
        self.previous
            .get(container_id)
            .and_then(|metrics| metrics.get(&metric).copied())
    }

    /// Forget every baseline of a container
    pub fn purge(&self, container_id: &str) -> bool {
        self.previous.remove(container_id).is_some()
    }

    pub fn tracked_containers(&self) -> usize {
        self.previous.len()
    }
}
