//! Container launches as pollable handles
//!
//! Starting a container is slow and runs somewhere else entirely, so the
//! launcher hands back a [`LaunchHandle`] immediately and the enforcement
//! loop polls it on later passes. Nothing in this module ever blocks on a
//! launch finishing.

use crate::error::{HandleError, LaunchError};
use crate::models::{Container, ContainerSpec};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Advisory wall-clock limit for a container start
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);

/// Launch and kill primitives backed by the surrounding platform
///
/// `start_async` must return without waiting for the container to come up;
/// failures surface through the returned handle, never through the call
/// itself. Kills are best-effort and fire-and-forget from the caller's
/// point of view.
#[async_trait]
pub trait ContainerLauncher: Send + Sync {
    /// Begin starting a container on the given agent
    async fn start_async(&self, agent_uid: &str, spec: &ContainerSpec) -> LaunchHandle;

    /// Kill a registered container
    async fn kill(&self, container: &Container) -> Result<()>;

    /// Kill a raw process on an agent that never registered as a container
    async fn kill_by_process_id(&self, agent_uid: &str, process_id: u64) -> Result<()>;
}

/// One in-flight container start
///
/// A handle is pending until its launcher records an outcome or the start
/// timeout elapses, whichever comes first. The timeout is advisory: a start
/// that succeeds after its handle already read as timed out will register
/// in inventory anyway and gets reconciled on a later pass.
#[derive(Debug)]
pub struct LaunchHandle {
    agent_uid: String,
    zone: String,
    requested_memory_mb: u64,
    started: Instant,
    started_at: DateTime<Utc>,
    timeout: Duration,
    slot: Arc<OnceLock<Result<Container, LaunchError>>>,
}

impl LaunchHandle {
    /// Create a pending handle with [`DEFAULT_START_TIMEOUT`]
    pub fn pending(agent_uid: impl Into<String>, spec: &ContainerSpec) -> (Self, LaunchCompleter) {
        Self::pending_with_timeout(agent_uid, spec, DEFAULT_START_TIMEOUT)
    }

    pub fn pending_with_timeout(
        agent_uid: impl Into<String>,
        spec: &ContainerSpec,
        timeout: Duration,
    ) -> (Self, LaunchCompleter) {
        let slot = Arc::new(OnceLock::new());
        let handle = Self {
            agent_uid: agent_uid.into(),
            zone: spec.zone.clone(),
            requested_memory_mb: spec.memory_mb,
            started: Instant::now(),
            started_at: Utc::now(),
            timeout,
            slot: Arc::clone(&slot),
        };
        (handle, LaunchCompleter { slot })
    }

    /// True once the launch succeeded, failed, or ran out its start timeout
    pub fn is_done(&self) -> bool {
        self.slot.get().is_some() || self.started.elapsed() >= self.timeout
    }

    /// The settled outcome, or `None` while the launch is still pending
    ///
    /// A recorded outcome wins over the timeout clock, so a success that
    /// lands late is still reported as a success.
    pub fn outcome(&self) -> Option<Result<Container, LaunchError>> {
        if let Some(outcome) = self.slot.get() {
            return Some(outcome.clone());
        }
        if self.started.elapsed() >= self.timeout {
            return Some(Err(LaunchError::TimedOut(self.timeout)));
        }
        None
    }

    /// Like [`outcome`](Self::outcome) but pending reads as an error
    pub fn result(&self) -> Result<Container, HandleError> {
        match self.outcome() {
            Some(Ok(container)) => Ok(container),
            Some(Err(error)) => Err(HandleError::Launch(error)),
            None => Err(HandleError::NotReady),
        }
    }

    pub fn target_agent(&self) -> &str {
        &self.agent_uid
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Memory the pending container will occupy once it registers, in MB
    pub fn requested_memory_mb(&self) -> u64 {
        self.requested_memory_mb
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Write-once completion side of a launch, held by the launcher
pub struct LaunchCompleter {
    slot: Arc<OnceLock<Result<Container, LaunchError>>>,
}

impl LaunchCompleter {
    /// Record a successful start; returns false if an outcome already landed
    pub fn succeed(self, container: Container) -> bool {
        self.slot.set(Ok(container)).is_ok()
    }

    /// Record a failed start; returns false if an outcome already landed
    pub fn fail(self, error: LaunchError) -> bool {
        self.slot.set(Err(error)).is_ok()
    }
}
