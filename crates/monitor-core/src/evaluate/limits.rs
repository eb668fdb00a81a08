//! Warning/critical threshold pairs

use crate::models::Resource;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LimitError {
    #[error("threshold must be a finite number, got warning={warning} critical={critical}")]
    NotFinite { warning: f64, critical: f64 },

    #[error("warning threshold {warning} exceeds critical threshold {critical}")]
    WarningAboveCritical { warning: f64, critical: f64 },
}

/// Warning and critical thresholds for one resource
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Limit {
    warning: f64,
    critical: f64,
}

impl Limit {
    /// Create a limit, rejecting non-finite values and `warning > critical`
    pub fn new(warning: f64, critical: f64) -> Result<Self, LimitError> {
        if !warning.is_finite() || !critical.is_finite() {
            return Err(LimitError::NotFinite { warning, critical });
        }
        if warning > critical {
            return Err(LimitError::WarningAboveCritical { warning, critical });
        }
        Ok(Self { warning, critical })
    }

    pub fn warning(&self) -> f64 {
        self.warning
    }

    pub fn critical(&self) -> f64 {
        self.critical
    }
}

/// One limit per resource category
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Limits {
    pub cpu: Limit,
    pub ram: Limit,
    pub disk: Limit,
    pub net_in: Limit,
    pub net_out: Limit,
}

impl Limits {
    pub fn for_resource(&self, resource: Resource) -> Limit {
        match resource {
            Resource::Cpu => self.cpu,
            Resource::Ram => self.ram,
            Resource::Disk => self.disk,
            Resource::NetIn => self.net_in,
            Resource::NetOut => self.net_out,
        }
    }
}

impl Default for Limits {
    /// CPU and RAM in percent, disk reads in MiB and network in KiB per cycle
    fn default() -> Self {
        Self {
            cpu: Limit {
                warning: 80.0,
                critical: 90.0,
            },
            ram: Limit {
                warning: 80.0,
                critical: 90.0,
            },
            disk: Limit {
                warning: 100.0,
                critical: 500.0,
            },
            net_in: Limit {
                warning: 10_240.0,
                critical: 102_400.0,
            },
            net_out: Limit {
                warning: 10_240.0,
                critical: 102_400.0,
            },
        }
    }
}
