//! Engine assembly and workload lifecycle

use crate::error::StateError;
use crate::inventory::InventoryProvider;
use crate::launch::ContainerLauncher;
use crate::observability::{EnforcerMetrics, EventLog};
use crate::ops::{OpsQueue, OpsWorker, DEFAULT_QUEUE_CAPACITY};
use crate::state::ReconciliationState;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use super::cleanup::{FailureJanitor, JanitorConfig, DEFAULT_FORGET_AFTER};
use super::endpoint::{EndpointShared, ReconciliationEndpoint};

/// Tunables for the enforcement engine
#[derive(Debug, Clone)]
pub struct EnforcementConfig {
    /// Cluster name stamped onto every structured log event
    pub cluster_name: String,
    /// Capacity of the fire-and-forget admin queue
    pub ops_queue_capacity: usize,
    /// Retention for failed-launch records
    pub forget_failures_after: Duration,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            cluster_name: "local".to_string(),
            ops_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            forget_failures_after: DEFAULT_FORGET_AFTER,
        }
    }
}

/// Creates and destroys per-workload reconciliation endpoints
///
/// Every endpoint shares one state registry, one admin queue, and one
/// failure janitor. The engine hands back an [`OpsWorker`] that the
/// embedder must spawn; nothing else runs in the background.
pub struct ReconciliationEngine {
    shared: EndpointShared,
    endpoints: DashMap<String, Arc<ReconciliationEndpoint>>,
}

impl ReconciliationEngine {
    pub fn new(
        inventory: Arc<dyn InventoryProvider>,
        launcher: Arc<dyn ContainerLauncher>,
        config: EnforcementConfig,
    ) -> (Self, OpsWorker) {
        let state = Arc::new(ReconciliationState::new());
        let (ops, receiver) = OpsQueue::new(config.ops_queue_capacity);
        let worker = OpsWorker::new(Arc::clone(&launcher), receiver);
        let metrics = EnforcerMetrics::new();
        let events = EventLog::new(config.cluster_name.clone());
        let janitor = Arc::new(FailureJanitor::new(
            Arc::clone(&state),
            Arc::clone(&inventory),
            ops.clone(),
            JanitorConfig {
                forget_after: config.forget_failures_after,
            },
            metrics.clone(),
            events.clone(),
        ));

        let shared = EndpointShared {
            state,
            inventory,
            launcher,
            ops,
            janitor,
            metrics,
            events,
        };
        let engine = Self {
            shared,
            endpoints: DashMap::new(),
        };
        (engine, worker)
    }

    /// Bring a workload under management and hand out its endpoint
    pub fn deploy_workload(&self, zone: &str) -> Result<Arc<ReconciliationEndpoint>, StateError> {
        self.shared.state.init_workload(zone)?;
        let endpoint = Arc::new(ReconciliationEndpoint::new(
            zone.to_string(),
            self.shared.clone(),
        ));
        self.endpoints.insert(zone.to_string(), Arc::clone(&endpoint));
        self.shared
            .metrics
            .set_managed_workloads(self.endpoints.len() as i64);
        self.shared.events.log_workload_deployed(zone);
        Ok(endpoint)
    }

    /// Remove a workload from management
    ///
    /// Launches still in flight are abandoned, not cancelled. One that
    /// succeeds later registers in inventory and gets reconciled whenever
    /// the zone comes back under management.
    pub fn undeploy_workload(&self, zone: &str) -> Result<(), StateError> {
        self.shared.state.destroy_workload(zone)?;
        self.endpoints.remove(zone);
        self.shared.metrics.clear_workload(zone);
        self.shared
            .metrics
            .set_managed_workloads(self.endpoints.len() as i64);
        self.shared.events.log_workload_undeployed(zone);
        Ok(())
    }

    /// Endpoint for a deployed workload, if any
    pub fn endpoint(&self, zone: &str) -> Option<Arc<ReconciliationEndpoint>> {
        self.endpoints
            .get(zone)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Zones currently under management, sorted
    pub fn workloads(&self) -> Vec<String> {
        let mut zones: Vec<String> = self.endpoints.iter().map(|e| e.key().clone()).collect();
        zones.sort();
        zones
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnforceError;
    use crate::launch::LaunchHandle;
    use crate::models::{Container, ContainerSpec, SlaPolicy};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct EmptyInventory;

    #[async_trait]
    impl InventoryProvider for EmptyInventory {
        async fn containers_for_workload(&self, _zone: &str) -> Result<Vec<Container>> {
            Ok(Vec::new())
        }

        async fn containers_for_agent(
            &self,
            _agent_uid: &str,
            _zone: &str,
        ) -> Result<Vec<Container>> {
            Ok(Vec::new())
        }

        async fn is_agent_live(&self, _agent_uid: &str) -> Result<bool> {
            Ok(true)
        }

        async fn live_process_ids_on_agent(&self, _agent_uid: &str) -> Result<HashSet<u64>> {
            Ok(HashSet::new())
        }

        async fn registered_container_ids_on_agent(
            &self,
            _agent_uid: &str,
        ) -> Result<HashSet<u64>> {
            Ok(HashSet::new())
        }
    }

    struct NoopLauncher;

    #[async_trait]
    impl ContainerLauncher for NoopLauncher {
        async fn start_async(&self, agent_uid: &str, spec: &ContainerSpec) -> LaunchHandle {
            let (handle, _completer) = LaunchHandle::pending(agent_uid, spec);
            handle
        }

        async fn kill(&self, _container: &Container) -> Result<()> {
            Ok(())
        }

        async fn kill_by_process_id(&self, _agent_uid: &str, _process_id: u64) -> Result<()> {
            Ok(())
        }
    }

    fn engine() -> ReconciliationEngine {
        let (engine, _worker) = ReconciliationEngine::new(
            Arc::new(EmptyInventory),
            Arc::new(NoopLauncher),
            EnforcementConfig::default(),
        );
        engine
    }

    #[test]
    fn test_deploy_is_exclusive_per_zone() {
        let engine = engine();

        let endpoint = engine.deploy_workload("zone-payments").unwrap();
        assert_eq!(endpoint.zone(), "zone-payments");
        assert!(matches!(
            engine.deploy_workload("zone-payments"),
            Err(StateError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_undeploy_unknown_zone_is_rejected() {
        let engine = engine();

        assert_eq!(
            engine.undeploy_workload("zone-ghost"),
            Err(StateError::NotFound("zone-ghost".to_string()))
        );
    }

    #[test]
    fn test_workloads_are_listed_sorted() {
        let engine = engine();
        engine.deploy_workload("zone-b").unwrap();
        engine.deploy_workload("zone-a").unwrap();

        assert_eq!(engine.workloads(), vec!["zone-a", "zone-b"]);
        assert!(engine.endpoint("zone-a").is_some());
        assert!(engine.endpoint("zone-ghost").is_none());
    }

    #[tokio::test]
    async fn test_undeployed_endpoint_reports_destroyed() {
        let engine = engine();
        let endpoint = engine.deploy_workload("zone-payments").unwrap();
        engine.undeploy_workload("zone-payments").unwrap();

        let policy = SlaPolicy::new("zone-payments", 256).allocate("agent-a", 1024);
        assert_eq!(
            endpoint.enforce_sla(&policy).await,
            Err(EnforceError::Destroyed("zone-payments".to_string()))
        );
        assert!(engine.endpoint("zone-payments").is_none());
    }
}
