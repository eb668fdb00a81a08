//! Container discovery and lifecycle tracking
//!
//! Diffs each discovery result against the tracked set so that new
//! containers are picked up and vanished ones are evicted.

use super::ContainerRuntime;
use crate::models::ContainerIdentity;
use anyhow::Result;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::{debug, info};

/// Containers added and removed by a single refresh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshOutcome {
    pub added: Vec<ContainerIdentity>,
    pub removed: Vec<ContainerIdentity>,
}

impl RefreshOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Registry of live containers on the host
pub struct ContainerRegistry {
    /// Map of container id -> identity
    containers: DashMap<String, ContainerIdentity>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self {
            containers: DashMap::new(),
        }
    }

    /// Replace the tracked set with `live`, reporting the difference
    ///
    /// Identities already tracked keep their existing entry. Duplicate ids in
    /// `live` collapse to the first occurrence.
    pub fn refresh(&self, live: Vec<ContainerIdentity>) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();
        let mut live_ids = HashSet::with_capacity(live.len());

        for identity in live {
            if !live_ids.insert(identity.id.clone()) {
                continue;
            }
            if !self.containers.contains_key(&identity.id) {
                debug!(container_id = %identity.id, image = %identity.image, "Registering container");
                self.containers.insert(identity.id.clone(), identity.clone());
                outcome.added.push(identity);
            }
        }

        let stale: Vec<String> = self
            .containers
            .iter()
            .filter(|entry| !live_ids.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        for id in stale {
            if let Some(identity) = self.unregister(&id) {
                outcome.removed.push(identity);
            }
        }

        if !outcome.is_unchanged() {
            info!(
                added = outcome.added.len(),
                removed = outcome.removed.len(),
                tracked = self.containers.len(),
                "Container set changed"
            );
        }

        outcome
    }

    /// Unregister a container
    pub fn unregister(&self, container_id: &str) -> Option<ContainerIdentity> {
        debug!(container_id = %container_id, "Unregistering container");
        self.containers.remove(container_id).map(|(_, v)| v)
    }

    /// Get container identity by id
    pub fn get(&self, container_id: &str) -> Option<ContainerIdentity> {
        self.containers.get(container_id).map(|r| r.clone())
    }

    pub fn contains(&self, container_id: &str) -> bool {
        self.containers.contains_key(container_id)
    }

    /// List all tracked containers, sorted by id
    pub fn list(&self) -> Vec<ContainerIdentity> {
        let mut containers: Vec<ContainerIdentity> =
            self.containers.iter().map(|r| r.value().clone()).collect();
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        containers
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Discover the running containers and refresh `registry` with them
pub async fn discover_containers(
    runtime: &dyn ContainerRuntime,
    registry: &ContainerRegistry,
) -> Result<(Vec<ContainerIdentity>, RefreshOutcome)> {
    let live = runtime.list_containers().await?;
    debug!(count = live.len(), "Discovered running containers");
    let outcome = registry.refresh(live.clone());
    Ok((live, outcome))
}
