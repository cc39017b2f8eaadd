//! Capacity SLA enforcement
//!
//! One reconciliation endpoint per deployed workload keeps that workload's
//! container fleet aligned with the latest capacity policy. Each
//! enforcement pass retires drained containers, settles in-flight
//! launches, marks surplus capacity for graceful deallocation, fills
//! unused capacity with new launches, and sweeps up after launches that
//! went wrong. Passes never block on the fleet catching up; the caller
//! simply invokes the endpoint again until it reports convergence.

mod cleanup;
mod endpoint;
mod engine;


pub use cleanup::{FailureJanitor, JanitorConfig, DEFAULT_FORGET_AFTER};
pub use endpoint::{PassStats, ReconciliationEndpoint};
pub use engine::{EnforcementConfig, ReconciliationEngine};
