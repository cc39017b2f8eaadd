//! Fire-and-forget admin operations
//!
//! Kill side effects never run inside an enforcement pass. The pass posts
//! commands to a bounded queue and moves on; a single worker task drains
//! the queue and drives the launcher. A full queue drops the command, and
//! the pass that posted it retries on its next run.

use crate::launch::ContainerLauncher;
use crate::models::Container;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Default capacity of the admin queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// One admin command for the worker
#[derive(Debug, Clone)]
pub enum AdminOp {
    /// Kill a container that is marked for deallocation and idle
    KillContainer(Container),
    /// Kill a raw process that never registered as a container
    KillProcess { agent_uid: String, process_id: u64 },
}

/// Posting half of the admin queue
#[derive(Clone)]
pub struct OpsQueue {
    sender: mpsc::Sender<AdminOp>,
}

impl OpsQueue {
    /// Create the queue; the receiver half belongs to an [`OpsWorker`]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AdminOp>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Post a command without blocking; false means it was dropped
    pub fn post(&self, op: AdminOp) -> bool {
        match self.sender.try_send(op) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(op)) => {
                warn!(op = ?op, "Admin queue full, dropping operation");
                false
            }
            Err(mpsc::error::TrySendError::Closed(op)) => {
                warn!(op = ?op, "Admin queue closed, dropping operation");
                false
            }
        }
    }
}

/// Background worker that executes admin commands
pub struct OpsWorker {
    launcher: Arc<dyn ContainerLauncher>,
    receiver: mpsc::Receiver<AdminOp>,
}

impl OpsWorker {
    pub fn new(launcher: Arc<dyn ContainerLauncher>, receiver: mpsc::Receiver<AdminOp>) -> Self {
        Self { launcher, receiver }
    }

    /// Run until shutdown or until every posting handle is gone
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting admin ops worker");

        loop {
            tokio::select! {
                op = self.receiver.recv() => {
                    match op {
                        Some(op) => self.execute(op).await,
                        None => {
                            debug!("Admin queue closed, stopping worker");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down admin ops worker");
                    break;
                }
            }
        }
    }

    async fn execute(&self, op: AdminOp) {
        match op {
            AdminOp::KillContainer(container) => {
                debug!(
                    zone = %container.zone,
                    agent_uid = %container.agent_uid,
                    container_id = container.id,
                    "Killing container"
                );
                if let Err(e) = self.launcher.kill(&container).await {
                    warn!(
                        agent_uid = %container.agent_uid,
                        container_id = container.id,
                        error = %e,
                        "Container kill failed"
                    );
                }
            }
            AdminOp::KillProcess {
                agent_uid,
                process_id,
            } => {
                debug!(agent_uid = %agent_uid, process_id, "Killing orphan process");
                if let Err(e) = self.launcher.kill_by_process_id(&agent_uid, process_id).await {
                    warn!(
                        agent_uid = %agent_uid,
                        process_id,
                        error = %e,
                        "Orphan process kill failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::LaunchHandle;
    use crate::models::ContainerSpec;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingLauncher {
        container_kills: Mutex<Vec<u64>>,
        process_kills: Mutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl ContainerLauncher for RecordingLauncher {
        async fn start_async(&self, agent_uid: &str, spec: &ContainerSpec) -> LaunchHandle {
            let (handle, _completer) = LaunchHandle::pending(agent_uid, spec);
            handle
        }

        async fn kill(&self, container: &Container) -> Result<()> {
            self.container_kills.lock().unwrap().push(container.id);
            Ok(())
        }

        async fn kill_by_process_id(&self, agent_uid: &str, process_id: u64) -> Result<()> {
            self.process_kills
                .lock()
                .unwrap()
                .push((agent_uid.to_string(), process_id));
            Ok(())
        }
    }

    fn container(id: u64) -> Container {
        Container {
            id,
            agent_uid: "agent-a".to_string(),
            zone: "zone-payments".to_string(),
            memory_mb: 256,
            instances: 0,
        }
    }

    #[tokio::test]
    async fn test_worker_executes_posted_ops() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (queue, receiver) = OpsQueue::new(8);
        let worker = OpsWorker::new(launcher.clone(), receiver);
        let (shutdown_tx, _) = broadcast::channel(1);
        let task = tokio::spawn(worker.run(shutdown_tx.subscribe()));

        assert!(queue.post(AdminOp::KillContainer(container(41))));
        assert!(queue.post(AdminOp::KillProcess {
            agent_uid: "agent-b".to_string(),
            process_id: 999,
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        assert_eq!(*launcher.container_kills.lock().unwrap(), vec![41]);
        assert_eq!(
            *launcher.process_kills.lock().unwrap(),
            vec![("agent-b".to_string(), 999)]
        );
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let (queue, _receiver) = OpsQueue::new(1);

        assert!(queue.post(AdminOp::KillContainer(container(1))));
        assert!(!queue.post(AdminOp::KillContainer(container(2))));
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let (queue, receiver) = OpsQueue::new(1);
        drop(receiver);

        assert!(!queue.post(AdminOp::KillContainer(container(1))));
    }
}
