//! Core data models for the stats agent

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Container identity as reported by runtime discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerIdentity {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
}

impl ContainerIdentity {
    pub fn new(id: impl Into<String>, names: Vec<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            names,
            image: image.into(),
        }
    }

    /// First display name, or the id when the runtime reported none
    pub fn display_name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.id)
    }
}

/// How a metric behaves across polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Point-in-time value, reported as-is
    Gauge,
    /// Monotonically increasing total, diffed across polls
    Counter,
}

/// Raw metrics read from the container runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    MemoryUsage,
    MemoryLimit,
    NetworkIn,
    NetworkOut,
    CpuUsage,
    CpuSystemUsage,
    DiskRead,
}

impl MetricName {
    pub const ALL: [MetricName; 7] = [
        MetricName::MemoryUsage,
        MetricName::MemoryLimit,
        MetricName::NetworkIn,
        MetricName::NetworkOut,
        MetricName::CpuUsage,
        MetricName::CpuSystemUsage,
        MetricName::DiskRead,
    ];

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricName::MemoryUsage | MetricName::MemoryLimit => MetricKind::Gauge,
            MetricName::NetworkIn
            | MetricName::NetworkOut
            | MetricName::CpuUsage
            | MetricName::CpuSystemUsage
            | MetricName::DiskRead => MetricKind::Counter,
        }
    }

    /// Key used in the stats log
    pub fn key(&self) -> &'static str {
        match self {
            MetricName::MemoryUsage => "memory_usage",
            MetricName::MemoryLimit => "memory_limit",
            MetricName::NetworkIn => "network_in",
            MetricName::NetworkOut => "network_out",
            MetricName::CpuUsage => "cpu",
            MetricName::CpuSystemUsage => "cpu_system_usage",
            MetricName::DiskRead => "disk_io_read",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One poll's raw counters in API units (bytes, nanoseconds)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMetricSet {
    values: HashMap<MetricName, f64>,
}

impl RawMetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, metric: MetricName, value: f64) {
        self.values.insert(metric, value);
    }

    pub fn with(mut self, metric: MetricName, value: f64) -> Self {
        self.insert(metric, value);
        self
    }

    pub fn get(&self, metric: MetricName) -> Option<f64> {
        self.values.get(&metric).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A normalized metric value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub value: f64,
    pub kind: MetricKind,
}

const BYTES_PER_KIB: f64 = 1024.0;
const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Point-in-time read of a container's metrics in engineering units
///
/// Memory is expressed in MiB, network traffic in KiB, disk reads in MiB and
/// CPU time in the runtime's native unit. Metrics absent from the raw set are
/// absent from the snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshot {
    samples: HashMap<MetricName, MetricSample>,
}

impl MetricSnapshot {
    pub fn from_raw(raw: &RawMetricSet) -> Self {
        let mut samples = HashMap::with_capacity(raw.len());

        for metric in MetricName::ALL {
            let Some(value) = raw.get(metric) else {
                continue;
            };

            let value = match metric {
                MetricName::MemoryUsage | MetricName::MemoryLimit => {
                    round3(value / BYTES_PER_MIB)
                }
                MetricName::NetworkIn | MetricName::NetworkOut => value / BYTES_PER_KIB,
                MetricName::CpuUsage | MetricName::CpuSystemUsage => round3(value),
                MetricName::DiskRead => value / BYTES_PER_MIB,
            };

            samples.insert(
                metric,
                MetricSample {
                    value,
                    kind: metric.kind(),
                },
            );
        }

        Self { samples }
    }

    pub fn get(&self, metric: MetricName) -> Option<MetricSample> {
        self.samples.get(&metric).copied()
    }

    /// Samples in a stable metric order
    pub fn iter(&self) -> impl Iterator<Item = (MetricName, MetricSample)> + '_ {
        MetricName::ALL
            .into_iter()
            .filter_map(|metric| self.get(metric).map(|sample| (metric, sample)))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Resource categories evaluated against thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Cpu,
    Ram,
    NetIn,
    NetOut,
    Disk,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Cpu,
        Resource::Ram,
        Resource::NetIn,
        Resource::NetOut,
        Resource::Disk,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Resource::Cpu => "CPU",
            Resource::Ram => "RAM",
            Resource::NetIn => "NETIN",
            Resource::NetOut => "NETOUT",
            Resource::Disk => "DISK",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Check status, ordered for worst-case aggregation
///
/// The discriminant doubles as the Nagios plugin return code.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusLevel {
    #[default]
    Ok = 0,
    Warning = 1,
    Critical = 2,
    Unknown = 3,
}

impl StatusLevel {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLevel::Ok => write!(f, "OK"),
            StatusLevel::Warning => write!(f, "WARNING"),
            StatusLevel::Critical => write!(f, "CRITICAL"),
            StatusLevel::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Per-cycle metric values: gauges as read, counters as deltas
pub type CycleValues = std::collections::BTreeMap<MetricName, f64>;

/// Evaluated value of one resource
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifiedMetric {
    pub status: StatusLevel,
    /// `None` when the value could not be computed
    pub value: Option<f64>,
}

/// Per-container evaluation result, keyed by resource
pub type ClassifiedMetrics = std::collections::BTreeMap<Resource, ClassifiedMetric>;

/// Aggregated host status for one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostStatusReport {
    pub level: StatusLevel,
    pub messages: Vec<String>,
    pub hostname: String,
}
