//! Enforcement cadence loop
//!
//! The capacity planner publishes the newest policy into a shared feed;
//! the driver replays whatever is latest against its endpoint on every
//! tick. Endpoints are poll-driven and non-blocking, so the driver is the
//! only place where time passes between passes.

use crate::enforcement::ReconciliationEndpoint;
use crate::error::EnforceError;
use crate::models::SlaPolicy;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Configuration for the enforcement driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Base enforcement interval (default: 5 seconds)
    pub interval: Duration,
    /// Maximum jitter to add to interval (default: 500 milliseconds)
    pub jitter: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            jitter: Duration::from_millis(500),
        }
    }
}

/// Shared slot holding the most recent policy for one workload
///
/// Publishing replaces the slot wholesale. The driver only ever reads the
/// latest policy; ticks skipped under a stale one are never replayed.
#[derive(Clone, Default)]
pub struct PolicyFeed {
    slot: Arc<RwLock<Option<SlaPolicy>>>,
}

impl PolicyFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the policy enforced from the next tick on
    pub async fn publish(&self, policy: SlaPolicy) {
        *self.slot.write().await = Some(policy);
    }

    /// Withdraw the policy; the driver idles until a new one is published
    pub async fn clear(&self) {
        *self.slot.write().await = None;
    }

    pub async fn latest(&self) -> Option<SlaPolicy> {
        self.slot.read().await.clone()
    }
}

/// Periodic loop driving one reconciliation endpoint
pub struct EnforcementDriver {
    /// Endpoint the driver keeps converged
    endpoint: Arc<ReconciliationEndpoint>,
    /// Source of the policy to enforce
    feed: PolicyFeed,
    /// Configuration
    config: DriverConfig,
}

impl EnforcementDriver {
    pub fn new(
        endpoint: Arc<ReconciliationEndpoint>,
        feed: PolicyFeed,
        config: DriverConfig,
    ) -> Self {
        Self {
            endpoint,
            feed,
            config,
        }
    }

    /// Run until shutdown or until the workload is destroyed
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            zone = %self.endpoint.zone(),
            interval_secs = self.config.interval.as_secs(),
            "Starting enforcement driver"
        );

        let mut tick_count = 0u64;
        let mut was_converged = false;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval()) => {
                    tick_count += 1;

                    let policy = match self.feed.latest().await {
                        Some(policy) => policy,
                        None => {
                            if tick_count % 12 == 0 {
                                debug!(zone = %self.endpoint.zone(), "No policy published yet");
                            }
                            continue;
                        }
                    };

                    match self.endpoint.enforce_sla(&policy).await {
                        Ok(converged) => {
                            if converged != was_converged {
                                info!(
                                    zone = %self.endpoint.zone(),
                                    converged = converged,
                                    "Workload convergence changed"
                                );
                                was_converged = converged;
                            }
                        }
                        Err(EnforceError::Destroyed(_)) => {
                            info!(
                                zone = %self.endpoint.zone(),
                                "Workload destroyed, stopping enforcement driver"
                            );
                            break;
                        }
                        Err(err) => {
                            warn!(
                                zone = %self.endpoint.zone(),
                                error = %err,
                                "Endpoint rejected the published policy"
                            );
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(zone = %self.endpoint.zone(), "Shutting down enforcement driver");
                    break;
                }
            }
        }
    }

    /// Next tick length, jittered to spread passes across workloads
    fn tick_interval(&self) -> Duration {
        let jitter_ms = rand_jitter(self.config.jitter.as_millis() as u64);
        self.config.interval + Duration::from_millis(jitter_ms)
    }
}

/// Generate a jitter value between 0 and max_ms
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    // Time-based pseudo-random, good enough to spread ticks
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}

/// Builder for creating the enforcement driver
pub struct EnforcementDriverBuilder {
    endpoint: Option<Arc<ReconciliationEndpoint>>,
    feed: Option<PolicyFeed>,
    config: DriverConfig,
}

impl EnforcementDriverBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            endpoint: None,
            feed: None,
            config: DriverConfig::default(),
        }
    }

    /// Set the reconciliation endpoint to drive
    pub fn endpoint(mut self, endpoint: Arc<ReconciliationEndpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set the policy feed to read from
    pub fn feed(mut self, feed: PolicyFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Set the enforcement interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the jitter duration
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Build the driver
    pub fn build(self) -> Result<EnforcementDriver> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| anyhow::anyhow!("Endpoint is required"))?;
        let feed = self.feed.ok_or_else(|| anyhow::anyhow!("Feed is required"))?;

        Ok(EnforcementDriver::new(endpoint, feed, self.config))
    }
}

impl Default for EnforcementDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
