//! Append-only per-container stats log
//!
//! One line per container per cycle, in `key=value` form:
//!
//! ```text
//! 2024-01-01T00:00:00+00:00 containerId=abc containerImg=nginx containerName=web memory_usage=80 ...
//! ```

use crate::models::{ClassifiedMetrics, ContainerIdentity, CycleValues, MetricName, Resource};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum StatsLogError {
    #[error("failed to write stats log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything written for one container in one cycle
pub struct StatsLine<'a> {
    pub container: &'a ContainerIdentity,
    pub env: &'a [String],
    pub values: &'a CycleValues,
    pub classified: &'a ClassifiedMetrics,
}

impl StatsLine<'_> {
    /// Render without timestamp or trailing newline
    pub fn render(&self) -> String {
        let mut line = format!(
            "containerId={} containerImg={} containerName={}",
            self.container.id,
            self.container.image,
            self.container.display_name()
        );

        for var in self.env {
            let _ = write!(line, " {var}");
        }

        for metric in MetricName::ALL {
            if let Some(value) = self.values.get(&metric) {
                let _ = write!(line, " {}={}", metric.key(), value);
            }
            match metric {
                MetricName::MemoryLimit => self.push_percentage(&mut line, Resource::Ram, "memory_percentage_usage"),
                MetricName::CpuSystemUsage => self.push_percentage(&mut line, Resource::Cpu, "cpu_percentage_usage"),
                _ => {}
            }
        }

        line
    }

    fn push_percentage(&self, line: &mut String, resource: Resource, key: &str) {
        match self.classified.get(&resource).and_then(|m| m.value) {
            Some(value) => {
                let _ = write!(line, " {key}={value:.3}%");
            }
            None => {
                let _ = write!(line, " {key}=n/a");
            }
        }
    }
}

/// Appends stats lines to a file
#[derive(Debug, Clone)]
pub struct StatsLog {
    path: PathBuf,
}

impl StatsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line, creating the file if needed
    pub async fn append(&self, line: &StatsLine<'_>) -> Result<(), StatsLogError> {
        let text = format!("{} {}\n", chrono::Utc::now().to_rfc3339(), line.render());

        let io_err = |source| StatsLogError::Io {
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(text.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        Ok(())
    }
}
