//! Per-workload reconciliation endpoint
//!
//! The endpoint is poll-driven: every call to [`enforce_sla`] runs exactly
//! one pass over the fleet and returns without waiting for containers to
//! drain or launches to finish. Convergence is reached across calls, not
//! within one.
//!
//! [`enforce_sla`]: ReconciliationEndpoint::enforce_sla

use crate::error::EnforceError;
use crate::inventory::InventoryProvider;
use crate::launch::ContainerLauncher;
use crate::models::{Container, ContainerKey, SlaPolicy};
use crate::observability::{EnforcerMetrics, EventLog};
use crate::ops::{AdminOp, OpsQueue};
use crate::state::ReconciliationState;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::cleanup::FailureJanitor;

/// What one enforcement pass did and left behind
#[derive(Debug, Clone, Default)]
pub struct PassStats {
    pub marked: usize,
    pub inflight: usize,
    pub kills_posted: usize,
    pub launches_issued: usize,
    pub converged: bool,
}

/// Plumbing every endpoint shares with its engine
#[derive(Clone)]
pub(crate) struct EndpointShared {
    pub state: Arc<ReconciliationState>,
    pub inventory: Arc<dyn InventoryProvider>,
    pub launcher: Arc<dyn ContainerLauncher>,
    pub ops: OpsQueue,
    pub janitor: Arc<FailureJanitor>,
    pub metrics: EnforcerMetrics,
    pub events: EventLog,
}

/// Reconciliation endpoint for one workload zone
///
/// Created by [`ReconciliationEngine::deploy_workload`] and valid until the
/// workload is undeployed, after which every call fails with
/// [`EnforceError::Destroyed`].
///
/// [`ReconciliationEngine::deploy_workload`]: super::ReconciliationEngine::deploy_workload
pub struct ReconciliationEndpoint {
    zone: String,
    state: Arc<ReconciliationState>,
    inventory: Arc<dyn InventoryProvider>,
    launcher: Arc<dyn ContainerLauncher>,
    ops: OpsQueue,
    janitor: Arc<FailureJanitor>,
    metrics: EnforcerMetrics,
    events: EventLog,
    pass_lock: Mutex<()>,
}

impl ReconciliationEndpoint {
    pub(crate) fn new(zone: String, shared: EndpointShared) -> Self {
        let EndpointShared {
            state,
            inventory,
            launcher,
            ops,
            janitor,
            metrics,
            events,
        } = shared;
        Self {
            zone,
            state,
            inventory,
            launcher,
            ops,
            janitor,
            metrics,
            events,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Run one enforcement pass against the given policy
    ///
    /// Returns `Ok(true)` once the fleet matches the policy: nothing is
    /// marked for deallocation and no launch is in flight. `Ok(false)`
    /// means the pass did its share and the caller should invoke again
    /// later; this includes passes cut short by a transient inventory or
    /// launcher problem.
    ///
    /// Surplus eviction walks containers in ascending process-id order, so
    /// callers must not depend on which of two equal containers drains
    /// first. Concurrent calls for the same zone serialize.
    pub async fn enforce_sla(&self, policy: &SlaPolicy) -> Result<bool, EnforceError> {
        let _pass = self.pass_lock.lock().await;
        self.ensure_active()?;

        if policy.zone != self.zone {
            return Err(EnforceError::PolicyMismatch {
                policy_zone: policy.zone.clone(),
                endpoint_zone: self.zone.clone(),
            });
        }
        if policy.container.zone != self.zone {
            return Err(EnforceError::PolicyMismatch {
                policy_zone: policy.container.zone.clone(),
                endpoint_zone: self.zone.clone(),
            });
        }

        let start = Instant::now();
        match self.run_pass(policy).await {
            Ok(stats) => {
                let duration = start.elapsed();
                self.metrics.observe_pass_latency(duration.as_secs_f64());
                self.metrics.set_workload_status(
                    &self.zone,
                    stats.marked as i64,
                    stats.inflight as i64,
                    stats.converged,
                );
                self.events.log_pass(
                    &self.zone,
                    stats.marked,
                    stats.inflight,
                    stats.kills_posted,
                    stats.launches_issued,
                    stats.converged,
                    duration.as_millis() as u64,
                );
                Ok(stats.converged)
            }
            Err(err) => {
                // A destroy racing this pass surfaces as NotFound from the
                // ledger; the next call then reports Destroyed.
                warn!(zone = %self.zone, error = %err, "Enforcement pass aborted");
                Ok(false)
            }
        }
    }

    /// Live containers for the workload, minus those pending deallocation
    ///
    /// A transient inventory failure reads as an empty fleet; callers that
    /// need certainty should retry.
    pub async fn containers(&self) -> Result<Vec<Container>, EnforceError> {
        self.ensure_active()?;

        let live = match self.inventory.containers_for_workload(&self.zone).await {
            Ok(live) => live,
            Err(err) => {
                warn!(zone = %self.zone, error = %err, "Inventory read failed");
                return Ok(Vec::new());
            }
        };
        let marked: HashSet<ContainerKey> = self
            .state
            .marked_for_deallocation(&self.zone)
            .map_err(|_| self.destroyed())?
            .iter()
            .map(Container::key)
            .collect();

        Ok(live
            .into_iter()
            .filter(|container| !marked.contains(&container.key()))
            .collect())
    }

    /// Whether any container is still draining toward deallocation
    pub fn is_pending_deallocation(&self) -> Result<bool, EnforceError> {
        self.ensure_active()?;
        let marked = self
            .state
            .marked_count(&self.zone)
            .map_err(|_| self.destroyed())?;
        Ok(marked > 0)
    }

    fn ensure_active(&self) -> Result<(), EnforceError> {
        if self.state.is_destroyed(&self.zone) {
            return Err(self.destroyed());
        }
        Ok(())
    }

    fn destroyed(&self) -> EnforceError {
        EnforceError::Destroyed(self.zone.clone())
    }

    async fn run_pass(&self, policy: &SlaPolicy) -> Result<PassStats> {
        let live = self
            .inventory
            .containers_for_workload(&self.zone)
            .await
            .context("inventory read for workload failed")?;

        let kills_posted = self.retire_marked(&live).await?;
        self.drain_settled_launches()?;
        self.mark_unallocated(policy, &live)?;
        let kept_by_agent = self.mark_over_budget(policy).await?;
        let launches_issued = self.fill_surplus(policy, &kept_by_agent).await?;
        self.janitor.sweep().await?;

        let marked = self.state.marked_count(&self.zone)?;
        let inflight = self.state.launch_count(&self.zone)?;
        Ok(PassStats {
            marked,
            inflight,
            kills_posted,
            launches_issued,
            converged: marked == 0 && inflight == 0,
        })
    }

    /// Settle previously marked containers: forget the gone, kill the idle,
    /// leave the busy alone
    async fn retire_marked(&self, live: &[Container]) -> Result<usize> {
        let live_by_key: HashMap<ContainerKey, &Container> =
            live.iter().map(|c| (c.key(), c)).collect();
        let mut kills_posted = 0;

        for marked in self.state.marked_for_deallocation(&self.zone)? {
            match live_by_key.get(&marked.key()) {
                None => {
                    self.state.unmark_for_deallocation(&self.zone, &marked)?;
                    self.events
                        .log_container_retired(&self.zone, &marked.agent_uid, marked.id);
                }
                Some(current) if !current.is_busy() => {
                    if self.state.kill_requested(&self.zone, &marked)? {
                        continue;
                    }
                    // Record the kill only once it is actually queued, so a
                    // full queue gets retried on the next pass.
                    if self.ops.post(AdminOp::KillContainer((*current).clone())) {
                        self.state.record_kill_requested(&self.zone, &marked)?;
                        self.metrics.inc_kills_requested();
                        self.events
                            .log_kill_requested(&self.zone, &marked.agent_uid, marked.id);
                        kills_posted += 1;
                    }
                }
                Some(current) => {
                    debug!(
                        zone = %self.zone,
                        agent_uid = %current.agent_uid,
                        container_id = current.id,
                        instances = current.instances,
                        "Marked container still busy"
                    );
                }
            }
        }

        Ok(kills_posted)
    }

    /// Move settled launches out of the in-flight set; failures go to the
    /// process-wide ledger for cleanup
    fn drain_settled_launches(&self) -> Result<()> {
        while let Some(handle) = self.state.remove_next_done_launch(&self.zone)? {
            match handle.outcome() {
                Some(Ok(container)) => {
                    debug!(
                        zone = %self.zone,
                        agent_uid = %container.agent_uid,
                        container_id = container.id,
                        "Launch completed, container registered"
                    );
                }
                Some(Err(error)) => {
                    self.state.record_failed_launch(&handle, error.clone());
                    self.metrics.inc_launch_failures();
                    self.events
                        .log_launch_failed(&self.zone, handle.target_agent(), &error.to_string());
                }
                // is_done and outcome share one clock; a drained handle
                // always has an outcome
                None => {}
            }
        }
        Ok(())
    }

    /// Mark every container running on an agent the policy gives no budget
    fn mark_unallocated(&self, policy: &SlaPolicy, live: &[Container]) -> Result<()> {
        for container in live {
            if policy.budget_for(&container.agent_uid).is_some() {
                continue;
            }
            if self.state.is_marked(&self.zone, container)? {
                continue;
            }
            self.state
                .mark_for_deallocation(&self.zone, container.clone())?;
            self.events.log_container_marked(
                &self.zone,
                &container.agent_uid,
                container.id,
                "agent has no allocation",
            );
        }
        Ok(())
    }

    /// First-fit walk per allocated agent in ascending process-id order;
    /// whatever does not fit the budget gets marked
    ///
    /// Returns the memory kept per agent, which the launch step builds on.
    async fn mark_over_budget(&self, policy: &SlaPolicy) -> Result<HashMap<String, u64>> {
        let mut kept_by_agent = HashMap::new();

        for (agent_uid, budget) in &policy.allocations {
            let mut containers = self
                .inventory
                .containers_for_agent(agent_uid, &self.zone)
                .await
                .context("inventory read for agent failed")?;
            containers.sort_by_key(|c| c.id);

            let mut kept_mb = 0u64;
            for container in &containers {
                if self.state.is_marked(&self.zone, container)? {
                    continue;
                }
                if kept_mb + container.memory_mb <= *budget {
                    kept_mb += container.memory_mb;
                } else {
                    self.state
                        .mark_for_deallocation(&self.zone, container.clone())?;
                    self.events.log_container_marked(
                        &self.zone,
                        agent_uid,
                        container.id,
                        "over budget",
                    );
                }
            }
            kept_by_agent.insert(agent_uid.clone(), kept_mb);
        }

        Ok(kept_by_agent)
    }

    /// Issue launches until every agent's remaining budget is smaller than
    /// one container
    ///
    /// Memory promised to in-flight launches counts against the budget, so
    /// repeated passes never over-launch while starts are slow.
    async fn fill_surplus(
        &self,
        policy: &SlaPolicy,
        kept_by_agent: &HashMap<String, u64>,
    ) -> Result<usize> {
        let size = policy.container.memory_mb;
        if size == 0 {
            warn!(zone = %self.zone, "Policy container size is zero, not launching");
            return Ok(0);
        }

        let mut launches_issued = 0;
        for (agent_uid, budget) in &policy.allocations {
            let kept = kept_by_agent.get(agent_uid).copied().unwrap_or(0);
            let reserved = self.state.reserved_memory_on(&self.zone, agent_uid)?;
            let mut remaining = budget.saturating_sub(kept).saturating_sub(reserved);

            while remaining >= size {
                let handle = self.launcher.start_async(agent_uid, &policy.container).await;
                self.state.add_launch(&self.zone, handle)?;
                self.metrics.inc_launches_issued();
                self.events.log_launch_issued(&self.zone, agent_uid, size);
                launches_issued += 1;
                remaining -= size;
            }
        }

        Ok(launches_issued)
    }
}
