//! Failed-launch cleanup
//!
//! A launch that fails or times out leaves two liabilities behind: a
//! record in the process-wide failure ledger, and possibly a process that
//! started late and never registered as a container. The janitor runs at
//! the end of every enforcement pass and settles both, so cleanup happens
//! exactly as often as enforcement and never on its own timer.

use crate::inventory::InventoryProvider;
use crate::observability::{EnforcerMetrics, EventLog};
use crate::ops::{AdminOp, OpsQueue};
use crate::state::ReconciliationState;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Default retention for failure records
pub const DEFAULT_FORGET_AFTER: Duration = Duration::from_secs(120);

/// Configuration for failed-launch cleanup
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// How long a failure record is retained before it is forgotten
    pub forget_after: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            forget_after: DEFAULT_FORGET_AFTER,
        }
    }
}

/// Sweeps the failure ledger shared by all workloads
pub struct FailureJanitor {
    state: Arc<ReconciliationState>,
    inventory: Arc<dyn InventoryProvider>,
    ops: OpsQueue,
    config: JanitorConfig,
    metrics: EnforcerMetrics,
    events: EventLog,
    sweep_lock: Mutex<()>,
}

impl FailureJanitor {
    pub(crate) fn new(
        state: Arc<ReconciliationState>,
        inventory: Arc<dyn InventoryProvider>,
        ops: OpsQueue,
        config: JanitorConfig,
        metrics: EnforcerMetrics,
        events: EventLog,
    ) -> Self {
        Self {
            state,
            inventory,
            ops,
            config,
            metrics,
            events,
            sweep_lock: Mutex::new(()),
        }
    }

    /// One sweep over the failure ledger
    ///
    /// Records pointing at dead agents are forgotten outright; on live
    /// agents, any process without a registered container gets a kill
    /// posted. Records old enough fall out regardless, so a stubborn
    /// orphan cannot pin the ledger forever. Passes from different
    /// workloads serialize here.
    pub async fn sweep(&self) -> Result<()> {
        let _guard = self.sweep_lock.lock().await;

        let records = self.state.failed_launches();
        if !records.is_empty() {
            // Each agent is reconciled once per sweep, however many
            // failures point at it.
            let agents: BTreeSet<&str> = records.iter().map(|r| r.agent_uid.as_str()).collect();
            for agent_uid in agents {
                let live = self
                    .inventory
                    .is_agent_live(agent_uid)
                    .await
                    .context("agent liveness read failed")?;
                if live {
                    self.sweep_orphans(agent_uid).await?;
                } else {
                    for record in records.iter().filter(|r| r.agent_uid == agent_uid) {
                        if self.state.forget_failed_launch(record.id) {
                            debug!(
                                agent_uid = %agent_uid,
                                zone = %record.zone,
                                "Forgot failed launch, agent is gone"
                            );
                        }
                    }
                }
            }

            for record in self.state.failed_launches() {
                if record.age() < self.config.forget_after {
                    continue;
                }
                if self.state.forget_failed_launch(record.id) {
                    debug!(
                        agent_uid = %record.agent_uid,
                        zone = %record.zone,
                        "Forgot failed launch, retention elapsed"
                    );
                }
            }
        }

        self.metrics
            .set_failed_launch_records(self.state.failed_launches().len() as i64);
        Ok(())
    }

    /// Kill processes on the agent that never completed registration
    async fn sweep_orphans(&self, agent_uid: &str) -> Result<()> {
        let live_pids = self
            .inventory
            .live_process_ids_on_agent(agent_uid)
            .await
            .context("process listing failed")?;
        let registered = self
            .inventory
            .registered_container_ids_on_agent(agent_uid)
            .await
            .context("container id listing failed")?;

        for process_id in live_pids.difference(&registered) {
            self.events.log_orphan_kill(agent_uid, *process_id);
            if self.ops.post(AdminOp::KillProcess {
                agent_uid: agent_uid.to_string(),
                process_id: *process_id,
            }) {
                self.metrics.inc_orphan_kills();
            }
        }
        Ok(())
    }
}
