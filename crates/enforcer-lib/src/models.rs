//! Core data models for the SLA enforcer

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A worker process hosting instances of one workload on one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: u64,
    pub agent_uid: String,
    pub zone: String,
    pub memory_mb: u64,
    pub instances: u32,
}

impl Container {
    /// A container is busy while at least one workload instance runs inside it
    pub fn is_busy(&self) -> bool {
        self.instances > 0
    }

    /// Process ids are only unique within one agent, so identity is the pair
    pub fn key(&self) -> ContainerKey {
        ContainerKey {
            agent_uid: self.agent_uid.clone(),
            id: self.id,
        }
    }
}

/// Fleet-wide identity of a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerKey {
    pub agent_uid: String,
    pub id: u64,
}

/// Template for containers started to fill unused capacity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub zone: String,
    pub memory_mb: u64,
}

/// Capacity policy for one workload zone
///
/// Maps agent uids to the memory budget (in MB) the workload may occupy
/// there. Agents absent from the map have zero budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub zone: String,
    pub allocations: HashMap<String, u64>,
    pub container: ContainerSpec,
}

impl SlaPolicy {
    pub fn new(zone: impl Into<String>, container_memory_mb: u64) -> Self {
        let zone = zone.into();
        Self {
            container: ContainerSpec {
                zone: zone.clone(),
                memory_mb: container_memory_mb,
            },
            zone,
            allocations: HashMap::new(),
        }
    }

    /// Grant `budget_mb` of capacity on the given agent
    pub fn allocate(mut self, agent_uid: impl Into<String>, budget_mb: u64) -> Self {
        self.allocations.insert(agent_uid.into(), budget_mb);
        self
    }

    pub fn budget_for(&self, agent_uid: &str) -> Option<u64> {
        self.allocations.get(agent_uid).copied()
    }
}
