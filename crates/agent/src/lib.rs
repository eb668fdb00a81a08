//! Docker stats agent
//!
//! Configuration loading and the health/metrics HTTP API for the
//! `docker-stats` binary. The polling itself lives in `monitor-core`.

pub mod api;
pub mod config;
