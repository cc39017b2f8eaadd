//! Observability infrastructure for the SLA enforcer
//!
//! Provides:
//! - Prometheus metrics (pass latency, launches, kills, convergence per zone)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_gauge, register_int_gauge_vec, Histogram, IntGauge,
    IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Default histogram buckets for pass latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EnforcerMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct EnforcerMetricsInner {
    pass_latency_seconds: Histogram,
    passes_total: IntGauge,
    launches_issued_total: IntGauge,
    launch_failures_total: IntGauge,
    kills_requested_total: IntGauge,
    orphan_kills_total: IntGauge,
    marked_containers: IntGaugeVec,
    inflight_launches: IntGaugeVec,
    workload_converged: IntGaugeVec,
    managed_workloads: IntGauge,
    failed_launch_records: IntGauge,
}

impl EnforcerMetricsInner {
    fn new() -> Self {
        Self {
            pass_latency_seconds: register_histogram!(
                "sla_enforcer_pass_latency_seconds",
                "Time spent running one enforcement pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register pass_latency_seconds"),

            passes_total: register_int_gauge!(
                "sla_enforcer_passes_total",
                "Total number of enforcement passes run"
            )
            .expect("Failed to register passes_total"),

            launches_issued_total: register_int_gauge!(
                "sla_enforcer_launches_issued_total",
                "Total number of container launches issued"
            )
            .expect("Failed to register launches_issued_total"),

            launch_failures_total: register_int_gauge!(
                "sla_enforcer_launch_failures_total",
                "Total number of launches that failed or timed out"
            )
            .expect("Failed to register launch_failures_total"),

            kills_requested_total: register_int_gauge!(
                "sla_enforcer_kills_requested_total",
                "Total number of container kills posted to the admin queue"
            )
            .expect("Failed to register kills_requested_total"),

            orphan_kills_total: register_int_gauge!(
                "sla_enforcer_orphan_kills_total",
                "Total number of orphan process kills posted by cleanup"
            )
            .expect("Failed to register orphan_kills_total"),

            marked_containers: register_int_gauge_vec!(
                "sla_enforcer_marked_containers",
                "Containers currently marked for deallocation",
                &["zone"]
            )
            .expect("Failed to register marked_containers"),

            inflight_launches: register_int_gauge_vec!(
                "sla_enforcer_inflight_launches",
                "Launches currently in flight",
                &["zone"]
            )
            .expect("Failed to register inflight_launches"),

            workload_converged: register_int_gauge_vec!(
                "sla_enforcer_workload_converged",
                "Whether the workload matched its policy on the last pass (0/1)",
                &["zone"]
            )
            .expect("Failed to register workload_converged"),

            managed_workloads: register_int_gauge!(
                "sla_enforcer_managed_workloads",
                "Number of workloads with an active reconciliation endpoint"
            )
            .expect("Failed to register managed_workloads"),

            failed_launch_records: register_int_gauge!(
                "sla_enforcer_failed_launch_records",
                "Failure records currently held for cleanup"
            )
            .expect("Failed to register failed_launch_records"),
        }
    }
}

/// Enforcer metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct EnforcerMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for EnforcerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EnforcerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        // Initialize global metrics on first call
        GLOBAL_METRICS.get_or_init(EnforcerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EnforcerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record how long an enforcement pass took
    pub fn observe_pass_latency(&self, duration_secs: f64) {
        self.inner().pass_latency_seconds.observe(duration_secs);
        self.inner().passes_total.inc();
    }

    /// Update per-zone reconciliation gauges after a pass
    pub fn set_workload_status(&self, zone: &str, marked: i64, inflight: i64, converged: bool) {
        self.inner()
            .marked_containers
            .with_label_values(&[zone])
            .set(marked);
        self.inner()
            .inflight_launches
            .with_label_values(&[zone])
            .set(inflight);
        self.inner()
            .workload_converged
            .with_label_values(&[zone])
            .set(i64::from(converged));
    }

    /// Drop per-zone gauges once a workload is undeployed
    pub fn clear_workload(&self, zone: &str) {
        let inner = self.inner();
        let _ = inner.marked_containers.remove_label_values(&[zone]);
        let _ = inner.inflight_launches.remove_label_values(&[zone]);
        let _ = inner.workload_converged.remove_label_values(&[zone]);
    }

    pub fn inc_launches_issued(&self) {
        self.inner().launches_issued_total.inc();
    }

    pub fn inc_launch_failures(&self) {
        self.inner().launch_failures_total.inc();
    }

    pub fn inc_kills_requested(&self) {
        self.inner().kills_requested_total.inc();
    }

    pub fn inc_orphan_kills(&self) {
        self.inner().orphan_kills_total.inc();
    }

    pub fn set_managed_workloads(&self, count: i64) {
        self.inner().managed_workloads.set(count);
    }

    pub fn set_failed_launch_records(&self, count: i64) {
        self.inner().failed_launch_records.set(count);
    }
}

/// Structured logger for enforcement events
///
/// Provides consistent JSON-formatted logging for reconciliation passes,
/// launches, kills, and workload lifecycle changes.
#[derive(Clone)]
pub struct EventLog {
    cluster: String,
}

impl EventLog {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    /// Log that a workload came under management
    pub fn log_workload_deployed(&self, zone: &str) {
        info!(
            event = "workload_deployed",
            cluster = %self.cluster,
            zone = %zone,
            "Workload deployed, reconciliation endpoint created"
        );
    }

    /// Log that a workload left management
    pub fn log_workload_undeployed(&self, zone: &str) {
        info!(
            event = "workload_undeployed",
            cluster = %self.cluster,
            zone = %zone,
            "Workload undeployed, reconciliation state destroyed"
        );
    }

    /// Log the outcome of one enforcement pass
    pub fn log_pass(
        &self,
        zone: &str,
        marked: usize,
        inflight: usize,
        kills_posted: usize,
        launches_issued: usize,
        converged: bool,
        duration_ms: u64,
    ) {
        if kills_posted > 0 || launches_issued > 0 {
            info!(
                event = "enforcement_pass",
                cluster = %self.cluster,
                zone = %zone,
                marked = marked,
                inflight = inflight,
                kills_posted = kills_posted,
                launches_issued = launches_issued,
                converged = converged,
                duration_ms = duration_ms,
                "Enforcement pass changed the fleet"
            );
        } else {
            debug!(
                event = "enforcement_pass",
                cluster = %self.cluster,
                zone = %zone,
                marked = marked,
                inflight = inflight,
                converged = converged,
                duration_ms = duration_ms,
                "Enforcement pass completed"
            );
        }
    }

    /// Log a container being marked for deallocation
    pub fn log_container_marked(
        &self,
        zone: &str,
        agent_uid: &str,
        container_id: u64,
        reason: &str,
    ) {
        info!(
            event = "container_marked",
            cluster = %self.cluster,
            zone = %zone,
            agent_uid = %agent_uid,
            container_id = container_id,
            reason = %reason,
            "Container marked for deallocation"
        );
    }

    /// Log a marked container that finished draining out of the fleet
    pub fn log_container_retired(&self, zone: &str, agent_uid: &str, container_id: u64) {
        info!(
            event = "container_retired",
            cluster = %self.cluster,
            zone = %zone,
            agent_uid = %agent_uid,
            container_id = container_id,
            "Marked container left the fleet"
        );
    }

    /// Log a kill posted for an idle marked container
    pub fn log_kill_requested(&self, zone: &str, agent_uid: &str, container_id: u64) {
        info!(
            event = "kill_requested",
            cluster = %self.cluster,
            zone = %zone,
            agent_uid = %agent_uid,
            container_id = container_id,
            "Kill posted for idle marked container"
        );
    }

    /// Log a launch issued to fill unused capacity
    pub fn log_launch_issued(&self, zone: &str, agent_uid: &str, memory_mb: u64) {
        info!(
            event = "launch_issued",
            cluster = %self.cluster,
            zone = %zone,
            agent_uid = %agent_uid,
            memory_mb = memory_mb,
            "Container launch issued"
        );
    }

    /// Log a launch that settled without a container
    pub fn log_launch_failed(&self, zone: &str, agent_uid: &str, error: &str) {
        warn!(
            event = "launch_failed",
            cluster = %self.cluster,
            zone = %zone,
            agent_uid = %agent_uid,
            error = %error,
            "Container launch failed"
        );
    }

    /// Log an orphan process kill posted by cleanup
    pub fn log_orphan_kill(&self, agent_uid: &str, process_id: u64) {
        warn!(
            event = "orphan_kill",
            cluster = %self.cluster,
            agent_uid = %agent_uid,
            process_id = process_id,
            "Killing process that never registered as a container"
        );
    }

    /// Log enforcer startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "enforcer_started",
            cluster = %self.cluster,
            enforcer_version = %version,
            "SLA enforcer started"
        );
    }

    /// Log enforcer shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "enforcer_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "SLA enforcer shutting down"
        );
    }
}
