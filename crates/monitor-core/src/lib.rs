//! Core library for the Docker stats agent
//!
//! This crate provides the core functionality for:
//! - Container discovery and stats collection over the Docker socket
//! - Counter differencing and threshold evaluation
//! - Host status aggregation and reporting to Nagios via NSCA
//! - Health checks and observability

pub mod collector;
pub mod evaluate;
pub mod health;
pub mod models;
pub mod observability;
pub mod reporting;
pub mod stats_log;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
