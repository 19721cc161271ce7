//! Worker executing deferred tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::deployment::{DeferredDeployment, DeployRequest};
use crate::error::{ControlError, ControlResult};
use crate::monitor::InstallMonitor;
use crate::queue::{MemoryTaskQueue, Task, TaskQueue};

/// What happened to a processed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// The handler finished, possibly queueing its own follow-up.
    Done,
    /// The handler hit a transient error and the task was queued again.
    Redelivered {
        /// Attempt number of the queued task.
        attempt: u32,
        /// Delay before the queued task.
        delay: Duration,
    },
    /// The task failed permanently or ran out of attempts.
    Dropped,
}

/// Pulls tasks off the queue and dispatches them to their handlers.
pub struct TaskWorker {
    queue: Arc<MemoryTaskQueue>,
    monitor: Arc<InstallMonitor>,
    deferred: Arc<DeferredDeployment>,
    config: MonitorConfig,
}

impl TaskWorker {
    /// Create a new worker.
    pub fn new(
        queue: Arc<MemoryTaskQueue>,
        monitor: Arc<InstallMonitor>,
        deferred: Arc<DeferredDeployment>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            queue,
            monitor,
            deferred,
            config,
        }
    }

    /// Process tasks until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("task worker started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                delivery = self.queue.next() => {
                    self.process(delivery.task).await;
                }
            }
        }

        let pending = self.queue.pending_count().await;
        info!(pending, "task worker stopped");
    }

    /// Run the handler of a single task.
    pub async fn process(&self, task: Task) -> Processed {
        debug!(
            kind = task.kind(),
            server_id = %task.server_id(),
            attempt = task.attempt(),
            "processing task"
        );

        match self.dispatch(&task).await {
            Ok(()) => Processed::Done,
            Err(e) if e.is_retryable() => self.redeliver(task, &e).await,
            Err(e) => {
                warn!(
                    kind = task.kind(),
                    server_id = %task.server_id(),
                    error = %e,
                    "task failed permanently"
                );
                Processed::Dropped
            }
        }
    }

    async fn dispatch(&self, task: &Task) -> ControlResult<()> {
        match task {
            Task::MonitorInstall { server_id, attempt } => {
                let outcome = self.monitor.run(server_id, *attempt).await?;
                debug!(server_id = %server_id, outcome = ?outcome, "install monitor ran");
            }
            Task::DeployServer {
                request_id,
                server_id,
                period,
                options,
                attempt,
            } => {
                let outcome = self
                    .deferred
                    .run(DeployRequest {
                        request_id: request_id.clone(),
                        server_id: server_id.clone(),
                        period: *period,
                        options: *options,
                        attempt: *attempt,
                    })
                    .await?;
                debug!(server_id = %server_id, outcome = ?outcome, "deferred deployment ran");
            }
        }
        Ok(())
    }

    async fn redeliver(&self, task: Task, cause: &ControlError) -> Processed {
        let attempt = task.attempt();
        let next = attempt.saturating_add(1);
        let kind = task.kind();
        let server_id = task.server_id().clone();

        if next >= self.config.max_attempts {
            error!(kind, server_id = %server_id, error = %cause, "task out of attempts");
            return Processed::Dropped;
        }

        let delay = self.config.delay_for(attempt);
        match self.queue.enqueue(task.next_attempt(), delay).await {
            Ok(_) => {
                warn!(kind, server_id = %server_id, error = %cause, attempt = next, "task failed, redelivering");
                Processed::Redelivered {
                    attempt: next,
                    delay,
                }
            }
            Err(e) => {
                error!(kind, server_id = %server_id, error = %e, "failed to redeliver task");
                Processed::Dropped
            }
        }
    }
}

impl std::fmt::Debug for TaskWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
