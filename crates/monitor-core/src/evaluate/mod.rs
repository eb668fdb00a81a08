//! Threshold evaluation and status aggregation
//!
//! Provides:
//! - Warning/critical limits per resource
//! - Classification of resource readings into status levels
//! - Worst-case aggregation into a single host status

mod aggregate;
mod limits;
mod threshold;

pub use aggregate::{aggregate, ContainerStatuses};
pub use limits::{Limit, LimitError, Limits};
pub use threshold::{classify, classify_reading, percentage, ThresholdEvaluator};
