//! Durable-for-the-process reconciliation ledgers
//!
//! One ledger per deployed workload tracks which containers are marked for
//! deallocation and which launches are still in flight. A separate
//! process-wide ledger keeps launches that failed, because the processes
//! they may have leaked outlive the workload bookkeeping that spawned them.
//!
//! Everything here is synchronous and safe to call from concurrent
//! enforcement passes; the maps shard their locks internally.

use crate::error::{LaunchError, StateError};
use crate::launch::LaunchHandle;
use crate::models::{Container, ContainerKey};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A launch that settled without producing a registered container
#[derive(Debug, Clone)]
pub struct FailedLaunch {
    /// Ledger-unique id, used to forget the record once cleaned up
    pub id: u64,
    pub zone: String,
    pub agent_uid: String,
    pub requested_memory_mb: u64,
    pub error: LaunchError,
    pub started_at: DateTime<Utc>,
    recorded: Instant,
}

impl FailedLaunch {
    /// Time since the failure was recorded, which drives the forget window
    pub fn age(&self) -> Duration {
        self.recorded.elapsed()
    }
}

#[derive(Debug, Default)]
struct WorkloadLedger {
    marked: HashMap<ContainerKey, Container>,
    launches: Vec<LaunchHandle>,
    kills_requested: HashSet<ContainerKey>,
}

/// Registry of per-workload reconciliation ledgers
///
/// A workload must be initialized before any other call mentions it;
/// operations against an unknown zone fail with [`StateError::NotFound`].
/// Destroying a workload drops its ledger outright, abandoning whatever
/// launches were still in flight.
#[derive(Debug, Default)]
pub struct ReconciliationState {
    ledgers: DashMap<String, WorkloadLedger>,
    failed: Mutex<Vec<FailedLaunch>>,
    next_failure_id: AtomicU64,
}

impl ReconciliationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty ledger for a newly deployed workload
    pub fn init_workload(&self, zone: &str) -> Result<(), StateError> {
        match self.ledgers.entry(zone.to_string()) {
            Entry::Occupied(_) => Err(StateError::AlreadyInitialized(zone.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(WorkloadLedger::default());
                Ok(())
            }
        }
    }

    /// Drop the workload's ledger; subsequent calls for the zone fail
    pub fn destroy_workload(&self, zone: &str) -> Result<(), StateError> {
        self.ledgers
            .remove(zone)
            .map(|_| ())
            .ok_or_else(|| StateError::NotFound(zone.to_string()))
    }

    pub fn is_destroyed(&self, zone: &str) -> bool {
        !self.ledgers.contains_key(zone)
    }

    /// Flag a container for graceful deallocation; idempotent
    pub fn mark_for_deallocation(
        &self,
        zone: &str,
        container: Container,
    ) -> Result<(), StateError> {
        let mut ledger = self.ledger_mut(zone)?;
        ledger.marked.insert(container.key(), container);
        Ok(())
    }

    /// Clear a container's deallocation flag once it has left the fleet
    pub fn unmark_for_deallocation(
        &self,
        zone: &str,
        container: &Container,
    ) -> Result<(), StateError> {
        let mut ledger = self.ledger_mut(zone)?;
        let key = container.key();
        ledger.marked.remove(&key);
        ledger.kills_requested.remove(&key);
        Ok(())
    }

    pub fn is_marked(&self, zone: &str, container: &Container) -> Result<bool, StateError> {
        let ledger = self.ledger(zone)?;
        Ok(ledger.marked.contains_key(&container.key()))
    }

    /// Snapshot of marked containers, ordered by (agent, process id)
    pub fn marked_for_deallocation(&self, zone: &str) -> Result<Vec<Container>, StateError> {
        let ledger = self.ledger(zone)?;
        let mut marked: Vec<Container> = ledger.marked.values().cloned().collect();
        marked.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(marked)
    }

    pub fn marked_count(&self, zone: &str) -> Result<usize, StateError> {
        Ok(self.ledger(zone)?.marked.len())
    }

    /// Whether a kill was already posted for this marked container
    pub fn kill_requested(&self, zone: &str, container: &Container) -> Result<bool, StateError> {
        let ledger = self.ledger(zone)?;
        Ok(ledger.kills_requested.contains(&container.key()))
    }

    /// Remember that a kill was posted, so the container is not killed twice
    pub fn record_kill_requested(
        &self,
        zone: &str,
        container: &Container,
    ) -> Result<(), StateError> {
        let mut ledger = self.ledger_mut(zone)?;
        ledger.kills_requested.insert(container.key());
        Ok(())
    }

    /// Track a freshly issued launch for the workload
    pub fn add_launch(&self, zone: &str, handle: LaunchHandle) -> Result<(), StateError> {
        let mut ledger = self.ledger_mut(zone)?;
        ledger.launches.push(handle);
        Ok(())
    }

    /// Remove and return one settled launch, if any
    pub fn remove_next_done_launch(&self, zone: &str) -> Result<Option<LaunchHandle>, StateError> {
        let mut ledger = self.ledger_mut(zone)?;
        let done = ledger.launches.iter().position(LaunchHandle::is_done);
        Ok(done.map(|index| ledger.launches.swap_remove(index)))
    }

    pub fn launch_count(&self, zone: &str) -> Result<usize, StateError> {
        Ok(self.ledger(zone)?.launches.len())
    }

    /// Memory already promised to launches targeting the given agent, in MB
    ///
    /// Settled-but-undrained launches still count; over-reserving only
    /// delays a launch to the next pass, while under-reserving would burst
    /// past the budget.
    pub fn reserved_memory_on(&self, zone: &str, agent_uid: &str) -> Result<u64, StateError> {
        let ledger = self.ledger(zone)?;
        Ok(ledger
            .launches
            .iter()
            .filter(|handle| handle.target_agent() == agent_uid)
            .map(LaunchHandle::requested_memory_mb)
            .sum())
    }

    /// File a failure record in the process-wide ledger; returns its id
    pub fn record_failed_launch(&self, handle: &LaunchHandle, error: LaunchError) -> u64 {
        let id = self.next_failure_id.fetch_add(1, Ordering::Relaxed);
        let record = FailedLaunch {
            id,
            zone: handle.zone().to_string(),
            agent_uid: handle.target_agent().to_string(),
            requested_memory_mb: handle.requested_memory_mb(),
            error,
            started_at: handle.started_at(),
            recorded: Instant::now(),
        };
        self.lock_failed().push(record);
        id
    }

    /// Drop a failure record; returns false if it was already gone
    pub fn forget_failed_launch(&self, id: u64) -> bool {
        let mut failed = self.lock_failed();
        let before = failed.len();
        failed.retain(|record| record.id != id);
        failed.len() < before
    }

    /// Snapshot of the failure ledger across all workloads
    pub fn failed_launches(&self) -> Vec<FailedLaunch> {
        self.lock_failed().clone()
    }

    fn ledger(
        &self,
        zone: &str,
    ) -> Result<dashmap::mapref::one::Ref<'_, String, WorkloadLedger>, StateError> {
        self.ledgers
            .get(zone)
            .ok_or_else(|| StateError::NotFound(zone.to_string()))
    }

    fn ledger_mut(
        &self,
        zone: &str,
    ) -> Result<dashmap::mapref::one::RefMut<'_, String, WorkloadLedger>, StateError> {
        self.ledgers
            .get_mut(zone)
            .ok_or_else(|| StateError::NotFound(zone.to_string()))
    }

    fn lock_failed(&self) -> std::sync::MutexGuard<'_, Vec<FailedLaunch>> {
        // The ledger must stay readable even if a writer panicked
        match self.failed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContainerSpec;

    const ZONE: &str = "zone-payments";

    fn state_with_zone() -> ReconciliationState {
        let state = ReconciliationState::new();
        state.init_workload(ZONE).unwrap();
        state
    }

    fn container(agent_uid: &str, id: u64) -> Container {
        Container {
            id,
            agent_uid: agent_uid.to_string(),
            zone: ZONE.to_string(),
            memory_mb: 256,
            instances: 0,
        }
    }

    fn pending_handle(agent_uid: &str) -> (LaunchHandle, crate::launch::LaunchCompleter) {
        LaunchHandle::pending(
            agent_uid,
            &ContainerSpec {
                zone: ZONE.to_string(),
                memory_mb: 256,
            },
        )
    }

    #[test]
    fn test_init_is_exclusive_and_destroy_is_final() {
        let state = state_with_zone();

        assert_eq!(
            state.init_workload(ZONE),
            Err(StateError::AlreadyInitialized(ZONE.to_string()))
        );
        assert!(!state.is_destroyed(ZONE));

        state.destroy_workload(ZONE).unwrap();
        assert!(state.is_destroyed(ZONE));
        assert_eq!(
            state.destroy_workload(ZONE),
            Err(StateError::NotFound(ZONE.to_string()))
        );
    }

    #[test]
    fn test_unknown_zone_is_rejected_everywhere() {
        let state = ReconciliationState::new();
        let c = container("agent-a", 1);

        assert_eq!(
            state.mark_for_deallocation("zone-ghost", c.clone()),
            Err(StateError::NotFound("zone-ghost".to_string()))
        );
        assert_eq!(
            state.marked_count("zone-ghost"),
            Err(StateError::NotFound("zone-ghost".to_string()))
        );
        assert_eq!(
            state.launch_count("zone-ghost"),
            Err(StateError::NotFound("zone-ghost".to_string()))
        );
        assert_eq!(
            state.is_marked("zone-ghost", &c),
            Err(StateError::NotFound("zone-ghost".to_string()))
        );
    }

    #[test]
    fn test_marking_is_idempotent() {
        let state = state_with_zone();
        let c = container("agent-a", 10);

        state.mark_for_deallocation(ZONE, c.clone()).unwrap();
        state.mark_for_deallocation(ZONE, c.clone()).unwrap();

        assert_eq!(state.marked_count(ZONE).unwrap(), 1);
        assert!(state.is_marked(ZONE, &c).unwrap());
    }

    #[test]
    fn test_unmark_clears_mark_and_kill_record() {
        let state = state_with_zone();
        let c = container("agent-a", 10);

        state.mark_for_deallocation(ZONE, c.clone()).unwrap();
        state.record_kill_requested(ZONE, &c).unwrap();
        state.unmark_for_deallocation(ZONE, &c).unwrap();

        assert_eq!(state.marked_count(ZONE).unwrap(), 0);
        assert!(!state.kill_requested(ZONE, &c).unwrap());
    }

    #[test]
    fn test_marked_snapshot_is_ordered_and_detached() {
        let state = state_with_zone();
        state
            .mark_for_deallocation(ZONE, container("agent-b", 7))
            .unwrap();
        state
            .mark_for_deallocation(ZONE, container("agent-a", 9))
            .unwrap();
        state
            .mark_for_deallocation(ZONE, container("agent-a", 3))
            .unwrap();

        let mut snapshot = state.marked_for_deallocation(ZONE).unwrap();
        let ids: Vec<(String, u64)> = snapshot
            .iter()
            .map(|c| (c.agent_uid.clone(), c.id))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("agent-a".to_string(), 3),
                ("agent-a".to_string(), 9),
                ("agent-b".to_string(), 7),
            ]
        );

        snapshot.clear();
        assert_eq!(state.marked_count(ZONE).unwrap(), 3);
    }

    #[test]
    fn test_only_settled_launches_are_drained() {
        let state = state_with_zone();
        let (pending, _keep_pending) = pending_handle("agent-a");
        let (done, completer) = pending_handle("agent-b");
        completer.fail(LaunchError::Failed("boom".to_string()));

        state.add_launch(ZONE, pending).unwrap();
        state.add_launch(ZONE, done).unwrap();

        let drained = state.remove_next_done_launch(ZONE).unwrap().unwrap();
        assert_eq!(drained.target_agent(), "agent-b");
        assert!(state.remove_next_done_launch(ZONE).unwrap().is_none());
        assert_eq!(state.launch_count(ZONE).unwrap(), 1);
    }

    #[test]
    fn test_reserved_memory_is_per_agent() {
        let state = state_with_zone();
        let (a1, _c1) = pending_handle("agent-a");
        let (a2, _c2) = pending_handle("agent-a");
        let (b1, _c3) = pending_handle("agent-b");
        state.add_launch(ZONE, a1).unwrap();
        state.add_launch(ZONE, a2).unwrap();
        state.add_launch(ZONE, b1).unwrap();

        assert_eq!(state.reserved_memory_on(ZONE, "agent-a").unwrap(), 512);
        assert_eq!(state.reserved_memory_on(ZONE, "agent-b").unwrap(), 256);
        assert_eq!(state.reserved_memory_on(ZONE, "agent-c").unwrap(), 0);
    }

    #[test]
    fn test_failure_ledger_survives_workload_destroy() {
        let state = state_with_zone();
        let (handle, _completer) = pending_handle("agent-a");
        let id = state.record_failed_launch(&handle, LaunchError::TimedOut(Duration::from_secs(60)));

        state.destroy_workload(ZONE).unwrap();

        let failed = state.failed_launches();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, id);
        assert_eq!(failed[0].zone, ZONE);
        assert_eq!(failed[0].agent_uid, "agent-a");
        assert_eq!(failed[0].requested_memory_mb, 256);
    }

    #[test]
    fn test_forget_failed_launch_is_permanent() {
        let state = state_with_zone();
        let (handle, _completer) = pending_handle("agent-a");
        let id = state.record_failed_launch(&handle, LaunchError::Failed("boom".to_string()));

        assert!(state.forget_failed_launch(id));
        assert!(!state.forget_failed_launch(id));
        assert!(state.failed_launches().is_empty());
    }
}
