//! Read-only view of the live fleet
//!
//! The discovery plane owns the authoritative picture of agents and
//! containers. Enforcement reconciles from what this interface reports and
//! never trusts its own launch bookkeeping over it.

use crate::models::Container;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// Snapshot queries over agents and registered containers
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// All running containers serving the given workload zone
    async fn containers_for_workload(&self, zone: &str) -> Result<Vec<Container>>;

    /// Running containers for the workload zone on one agent
    async fn containers_for_agent(&self, agent_uid: &str, zone: &str) -> Result<Vec<Container>>;

    /// Whether the agent is currently part of the live fleet
    async fn is_agent_live(&self, agent_uid: &str) -> Result<bool>;

    /// Raw process ids currently alive on the agent
    async fn live_process_ids_on_agent(&self, agent_uid: &str) -> Result<HashSet<u64>>;

    /// Process ids that completed container registration on the agent
    async fn registered_container_ids_on_agent(&self, agent_uid: &str) -> Result<HashSet<u64>>;
}
