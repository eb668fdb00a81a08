//! Health of the poll loop
//!
//! Counts consecutive failures of container discovery and passive check
//! submission and remembers when the last poll cycle completed. The health
//! endpoints read it back.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names for health tracking
pub mod components {
    /// Container listing against the runtime
    pub const DISCOVERY: &str = "discovery";
    /// Passive check submission through the reporting driver
    pub const REPORTER: &str = "reporter";
}

/// A failed discovery aborts the cycle, so one failure is enough
pub const DISCOVERY_FAILURE_LIMIT: u32 = 1;

/// Consecutive failed submissions before the reporter counts as down
pub const REPORTER_FAILURE_LIMIT: u32 = 3;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing, but below the component's failure limit
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Failure record of one component
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_timestamp: Option<i64>,
    #[serde(skip)]
    failure_limit: u32,
}

impl ComponentHealth {
    fn new(failure_limit: u32) -> Self {
        Self {
            status: ComponentStatus::Healthy,
            consecutive_failures: 0,
            last_error: None,
            last_success_timestamp: None,
            failure_limit: failure_limit.max(1),
        }
    }

    fn record_success(&mut self) {
        self.status = ComponentStatus::Healthy;
        self.consecutive_failures = 0;
        self.last_error = None;
        self.last_success_timestamp = Some(chrono::Utc::now().timestamp());
    }

    fn record_failure(&mut self, error: String) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
        self.status = if self.consecutive_failures >= self.failure_limit {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub cycles_completed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_timestamp: Option<i64>,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Readiness response
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<String, ComponentHealth>,
    cycles_completed: u64,
    last_cycle_timestamp: Option<i64>,
}

impl HealthState {
    fn component(&mut self, name: &str) -> &mut ComponentHealth {
        self.components
            .entry(name.to_string())
            .or_insert_with(|| ComponentHealth::new(1))
    }

    fn status(&self) -> ComponentStatus {
        self.components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Shared health state of the poll loop
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with discovery and reporter registered at their limits
    pub async fn for_poll_loop() -> Self {
        let registry = Self::new();
        registry
            .register(components::DISCOVERY, DISCOVERY_FAILURE_LIMIT)
            .await;
        registry
            .register(components::REPORTER, REPORTER_FAILURE_LIMIT)
            .await;
        registry
    }

    /// Register a component that turns unhealthy after `failure_limit`
    /// consecutive failures
    pub async fn register(&self, name: &str, failure_limit: u32) {
        let mut state = self.state.write().await;
        state
            .components
            .insert(name.to_string(), ComponentHealth::new(failure_limit));
    }

    pub async fn record_success(&self, name: &str) {
        self.state.write().await.component(name).record_success();
    }

    pub async fn record_failure(&self, name: &str, error: impl Into<String>) {
        self.state
            .write()
            .await
            .component(name)
            .record_failure(error.into());
    }

    /// Mark the end of a poll cycle that reached the emit step
    pub async fn record_cycle(&self) {
        let mut state = self.state.write().await;
        state.cycles_completed += 1;
        state.last_cycle_timestamp = Some(chrono::Utc::now().timestamp());
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: state.status(),
            cycles_completed: state.cycles_completed,
            last_cycle_timestamp: state.last_cycle_timestamp,
            components: state.components.clone(),
        }
    }

    /// Ready once a cycle has completed and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        let reason = if state.cycles_completed == 0 {
            Some("No poll cycle has completed yet".to_string())
        } else {
            state
                .components
                .iter()
                .find(|(_, c)| c.status == ComponentStatus::Unhealthy)
                .map(|(name, c)| {
                    format!(
                        "Component {name} failed {} times in a row",
                        c.consecutive_failures
                    )
                })
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_loop_registry_starts_healthy_and_unready() {
        let registry = HealthRegistry::for_poll_loop().await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components.len(), 2);
        assert_eq!(health.cycles_completed, 0);
        assert!(health.last_cycle_timestamp.is_none());

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("No poll cycle has completed yet")
        );
    }

    #[tokio::test]
    async fn test_reporter_degrades_then_fails_after_limit() {
        let registry = HealthRegistry::for_poll_loop().await;
        registry.record_cycle().await;

        for attempt in 1..REPORTER_FAILURE_LIMIT {
            registry
                .record_failure(components::REPORTER, "send_nsca exited with 1")
                .await;
            let health = registry.health().await;
            let reporter = &health.components[components::REPORTER];
            assert_eq!(reporter.status, ComponentStatus::Degraded);
            assert_eq!(reporter.consecutive_failures, attempt);
            assert!(registry.readiness().await.ready);
        }

        registry
            .record_failure(components::REPORTER, "send_nsca exited with 1")
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(
            registry.readiness().await.reason.as_deref(),
            Some("Component reporter failed 3 times in a row")
        );
    }

    #[tokio::test]
    async fn test_success_clears_failure_streak() {
        let registry = HealthRegistry::for_poll_loop().await;
        registry
            .record_failure(components::REPORTER, "timed out")
            .await;
        registry.record_success(components::REPORTER).await;

        let health = registry.health().await;
        let reporter = &health.components[components::REPORTER];
        assert_eq!(reporter.status, ComponentStatus::Healthy);
        assert_eq!(reporter.consecutive_failures, 0);
        assert!(reporter.last_error.is_none());
        assert!(reporter.last_success_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_single_discovery_failure_is_unhealthy() {
        let registry = HealthRegistry::for_poll_loop().await;
        registry.record_cycle().await;
        registry
            .record_failure(components::DISCOVERY, "connection refused")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert!(!health.status.is_operational());
        assert!(!registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_record_cycle_counts_and_readies() {
        let registry = HealthRegistry::for_poll_loop().await;
        registry.record_cycle().await;
        registry.record_cycle().await;

        let health = registry.health().await;
        assert_eq!(health.cycles_completed, 2);
        assert!(health.last_cycle_timestamp.is_some());
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_unregistered_component_fails_on_first_error() {
        let registry = HealthRegistry::new();
        registry.record_failure("stats_log", "disk full").await;

        let health = registry.health().await;
        assert_eq!(
            health.components["stats_log"].status,
            ComponentStatus::Unhealthy
        );
    }
}
