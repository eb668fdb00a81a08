//! Host-level status aggregation

use crate::models::{Resource, StatusLevel};
use std::collections::{BTreeMap, HashMap};

/// Per-container, per-resource statuses for one poll cycle
///
/// Lookups of containers or resources that were never recorded return
/// `None`; nothing is inserted on read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerStatuses {
    statuses: HashMap<String, BTreeMap<Resource, StatusLevel>>,
}

impl ContainerStatuses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the status of one resource, replacing an earlier value
    pub fn set(&mut self, container_id: &str, resource: Resource, status: StatusLevel) {
        self.statuses
            .entry(container_id.to_string())
            .or_default()
            .insert(resource, status);
    }

    pub fn get(&self, container_id: &str, resource: Resource) -> Option<StatusLevel> {
        self.statuses
            .get(container_id)
            .and_then(|resources| resources.get(&resource).copied())
    }

    pub fn container(&self, container_id: &str) -> Option<&BTreeMap<Resource, StatusLevel>> {
        self.statuses.get(container_id)
    }

    /// Every recorded status, across all containers and resources
    pub fn levels(&self) -> impl Iterator<Item = StatusLevel> + '_ {
        self.statuses
            .values()
            .flat_map(|resources| resources.values().copied())
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn clear(&mut self) {
        self.statuses.clear();
    }
}

/// Worst-case status across all containers
///
/// CRITICAL beats WARNING beats OK. UNKNOWN never raises the result; callers
/// surface it through their message list instead.
pub fn aggregate(statuses: &ContainerStatuses) -> StatusLevel {
    statuses
        .levels()
        .filter(|level| *level != StatusLevel::Unknown)
        .max()
        .unwrap_or(StatusLevel::Ok)
}
