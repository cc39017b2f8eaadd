//! Error types for the SLA enforcer

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of a reconciliation endpoint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnforceError {
    /// The workload was undeployed; the caller must stop invoking the endpoint
    #[error("workload `{0}` has been destroyed")]
    Destroyed(String),

    /// The policy targets a different zone than this endpoint manages
    #[error("policy is for zone `{policy_zone}` but endpoint manages `{endpoint_zone}`")]
    PolicyMismatch {
        policy_zone: String,
        endpoint_zone: String,
    },
}

/// Misuse of the reconciliation state registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("no reconciliation state for workload `{0}`")]
    NotFound(String),

    #[error("reconciliation state for workload `{0}` already exists")]
    AlreadyInitialized(String),
}

/// Terminal outcome of a container launch that did not produce a container
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("launcher reported failure: {0}")]
    Failed(String),

    #[error("container did not start within {0:?}")]
    TimedOut(Duration),
}

/// Errors returned when polling a launch handle for its result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    /// The launch has neither completed nor timed out yet
    #[error("launch still in flight")]
    NotReady,

    #[error(transparent)]
    Launch(#[from] LaunchError),
}
