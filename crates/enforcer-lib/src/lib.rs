//! Enforcer library for container capacity SLAs
//!
//! This crate provides the core functionality for:
//! - Per-workload reconciliation endpoints that converge container fleets
//!   toward capacity policies
//! - Pollable handles for asynchronous container launches
//! - Fire-and-forget kill execution decoupled from enforcement passes
//! - Cleanup of launches that failed or never registered
//! - Health checks and observability

pub mod driver;
pub mod enforcement;
pub mod error;
pub mod health;
pub mod inventory;
pub mod launch;
pub mod models;
pub mod observability;
pub mod ops;
pub mod state;

pub use driver::{DriverConfig, EnforcementDriver, EnforcementDriverBuilder, PolicyFeed};
pub use enforcement::{
    EnforcementConfig, PassStats, ReconciliationEndpoint, ReconciliationEngine,
};
pub use error::{EnforceError, HandleError, LaunchError, StateError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use inventory::InventoryProvider;
pub use launch::{ContainerLauncher, LaunchCompleter, LaunchHandle, DEFAULT_START_TIMEOUT};
pub use models::*;
pub use observability::{EnforcerMetrics, EventLog};
pub use ops::{AdminOp, OpsQueue, OpsWorker};
pub use state::{FailedLaunch, ReconciliationState};
