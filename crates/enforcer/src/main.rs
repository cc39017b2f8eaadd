//! SLA Enforcer - Container fleet reconciliation daemon
//!
//! This binary carries the operational shell of the enforcer: configuration,
//! health and readiness reporting, and Prometheus metrics exposition.
//! Deployments embed the reconciliation engine by linking inventory and
//! launcher implementations for their container platform.

use anyhow::Result;
use enforcer_lib::{
    health::{components, HealthRegistry},
    observability::{EnforcerMetrics, EventLog},
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const ENFORCER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting sla-enforcer");

    // Load configuration
    let config = config::EnforcerConfig::load()?;
    info!(cluster_name = %config.cluster_name, "Enforcer configured");

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::ENFORCEMENT);
    health_registry.register(components::OPS_WORKER);
    health_registry.register(components::API);

    // Initialize metrics
    let metrics = EnforcerMetrics::new();
    metrics.set_managed_workloads(0);

    // Initialize the event log
    let events = EventLog::new(&config.cluster_name);
    events.log_startup(ENFORCER_VERSION);

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));

    // Mark enforcer as ready after initialization
    health_registry.set_ready(true);

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    events.log_shutdown("SIGINT received");
    info!("Shutting down");

    api_handle.abort();

    Ok(())
}
