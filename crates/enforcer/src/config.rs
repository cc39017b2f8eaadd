//! Enforcer configuration

use anyhow::Result;
use enforcer_lib::{DriverConfig, EnforcementConfig};
use serde::Deserialize;
use std::time::Duration;

/// Enforcer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EnforcerConfig {
    /// Cluster name tagged onto every structured event
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Enforcement pass interval in seconds
    #[serde(default = "default_enforce_interval")]
    pub enforce_interval_secs: u64,

    /// Random jitter added to each pass interval, in milliseconds
    #[serde(default = "default_enforce_jitter")]
    pub enforce_jitter_ms: u64,

    /// Capacity of the kill/cleanup ops queue
    #[serde(default = "default_ops_queue_capacity")]
    pub ops_queue_capacity: usize,

    /// Retention for failed-launch records, in seconds
    #[serde(default = "default_forget_failures")]
    pub forget_failures_secs: u64,
}

fn default_cluster_name() -> String {
    std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "local".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_enforce_interval() -> u64 {
    5
}

fn default_enforce_jitter() -> u64 {
    500
}

fn default_ops_queue_capacity() -> usize {
    256
}

fn default_forget_failures() -> u64 {
    120
}

impl EnforcerConfig {
    /// Load configuration from environment and config file
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("ENFORCER"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| EnforcerConfig {
            cluster_name: default_cluster_name(),
            api_port: default_api_port(),
            enforce_interval_secs: default_enforce_interval(),
            enforce_jitter_ms: default_enforce_jitter(),
            ops_queue_capacity: default_ops_queue_capacity(),
            forget_failures_secs: default_forget_failures(),
        }))
    }

    /// Engine configuration derived from this config
    pub fn enforcement(&self) -> EnforcementConfig {
        EnforcementConfig {
            cluster_name: self.cluster_name.clone(),
            ops_queue_capacity: self.ops_queue_capacity,
            forget_failures_after: Duration::from_secs(self.forget_failures_secs),
        }
    }

    /// Driver cadence derived from this config
    pub fn driver(&self) -> DriverConfig {
        DriverConfig {
            interval: Duration::from_secs(self.enforce_interval_secs),
            jitter: Duration::from_millis(self.enforce_jitter_ms),
        }
    }
}
