//! Deferred task queue with delayed delivery.
//!
//! Tasks are delivered at least once, no earlier than their delay. While a
//! task is pending, enqueueing another task with the same dedup key returns
//! the pending task's handle instead, so overlapping producers collapse into
//! a single chain.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{ControlError, ControlResult};
use crate::types::{BillingPeriod, DeployOptions, ServerId};

/// Unique identifier for an enqueued task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a new task ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work that runs later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    /// Poll the panel until a new server is installed.
    MonitorInstall {
        /// Server to watch.
        server_id: ServerId,
        /// Zero-based poll number.
        attempt: u32,
    },
    /// Deploy a server once it is installed.
    DeployServer {
        /// Identifies the request across redeliveries.
        request_id: String,
        /// Server to deploy.
        server_id: ServerId,
        /// Billing period to charge.
        period: BillingPeriod,
        /// Deployment options.
        options: DeployOptions,
        /// Zero-based attempt number.
        attempt: u32,
    },
}

impl Task {
    /// Start watching a server's installation.
    #[must_use]
    pub const fn monitor(server_id: ServerId) -> Self {
        Self::MonitorInstall {
            server_id,
            attempt: 0,
        }
    }

    /// Deploy a server under a fresh request id.
    #[must_use]
    pub fn deploy(server_id: ServerId, period: BillingPeriod, options: DeployOptions) -> Self {
        Self::DeployServer {
            request_id: ulid::Ulid::new().to_string().to_lowercase(),
            server_id,
            period,
            options,
            attempt: 0,
        }
    }

    /// Key under which overlapping tasks collapse.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        match self {
            Self::MonitorInstall { server_id, .. } => format!("install:{server_id}"),
            Self::DeployServer { request_id, .. } => format!("deploy:{request_id}"),
        }
    }

    /// Task kind for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MonitorInstall { .. } => "monitor_install",
            Self::DeployServer { .. } => "deploy_server",
        }
    }

    /// Server the task targets.
    #[must_use]
    pub const fn server_id(&self) -> &ServerId {
        match self {
            Self::MonitorInstall { server_id, .. } | Self::DeployServer { server_id, .. } => {
                server_id
            }
        }
    }

    /// Zero-based attempt number.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        match self {
            Self::MonitorInstall { attempt, .. } | Self::DeployServer { attempt, .. } => *attempt,
        }
    }

    /// The same task with the attempt number advanced by one.
    #[must_use]
    pub fn next_attempt(mut self) -> Self {
        match &mut self {
            Self::MonitorInstall { attempt, .. } | Self::DeployServer { attempt, .. } => {
                *attempt = attempt.saturating_add(1);
            }
        }
        self
    }
}

/// Handle returned for an enqueued task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    /// The task identifier.
    pub id: TaskId,
    /// Dedup key of the task.
    pub key: String,
}

/// A task taken off the queue.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Handle the task was enqueued under.
    pub handle: TaskHandle,
    /// The task itself.
    pub task: Task,
}

/// Contract for deferring work.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task to run no earlier than `delay` from now.
    async fn enqueue(&self, task: Task, delay: Duration) -> ControlResult<TaskHandle>;
}

/// In-process task queue ordered by delivery time.
pub struct MemoryTaskQueue {
    pending: RwLock<BTreeMap<(Instant, u64), Delivery>>,
    keys: DashMap<String, TaskHandle>,
    seq: AtomicU64,
    max_size: usize,
    notify: Notify,
}

impl MemoryTaskQueue {
    /// Create a queue holding at most `max_size` pending tasks.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            pending: RwLock::new(BTreeMap::new()),
            keys: DashMap::new(),
            seq: AtomicU64::new(0),
            max_size,
            notify: Notify::new(),
        }
    }

    /// Wait for the next due task.
    pub async fn next(&self) -> Delivery {
        loop {
            let wake_at = {
                let mut pending = self.pending.write().await;
                match pending.first_key_value().map(|(&(run_at, _), _)| run_at) {
                    Some(run_at) if run_at <= Instant::now() => {
                        if let Some((_, delivery)) = pending.pop_first() {
                            self.keys.remove(&delivery.handle.key);
                            debug!(task_id = %delivery.handle.id, kind = delivery.task.kind(), "task dequeued");
                            return delivery;
                        }
                        None
                    }
                    other => other,
                }
            };

            match wake_at {
                Some(run_at) => {
                    tokio::select! {
                        () = self.notify.notified() => {}
                        () = tokio::time::sleep_until(run_at) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Take the next task if one is due, without waiting.
    pub async fn try_next(&self) -> Option<Delivery> {
        let mut pending = self.pending.write().await;
        let due = pending
            .first_key_value()
            .is_some_and(|(&(run_at, _), _)| run_at <= Instant::now());
        if !due {
            return None;
        }

        let (_, delivery) = pending.pop_first()?;
        self.keys.remove(&delivery.handle.key);
        debug!(task_id = %delivery.handle.id, kind = delivery.task.kind(), "task dequeued");
        Some(delivery)
    }

    /// Number of tasks waiting, due or not.
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Check if a task with the given dedup key is waiting.
    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task: Task, delay: Duration) -> ControlResult<TaskHandle> {
        let key = task.dedup_key();
        let mut pending = self.pending.write().await;

        if let Some(existing) = self.keys.get(&key).map(|h| h.clone()) {
            debug!(task_id = %existing.id, key = %key, "task already pending");
            return Ok(existing);
        }

        if pending.len() >= self.max_size {
            return Err(ControlError::QueueFull);
        }

        let handle = TaskHandle {
            id: TaskId::generate(),
            key: key.clone(),
        };
        let run_at = Instant::now() + delay;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let kind = task.kind();

        pending.insert(
            (run_at, seq),
            Delivery {
                handle: handle.clone(),
                task,
            },
        );
        self.keys.insert(key, handle.clone());
        drop(pending);

        self.notify.notify_one();

        info!(task_id = %handle.id, kind, delay = ?delay, "task queued");
        Ok(handle)
    }
}

impl fmt::Debug for MemoryTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTaskQueue")
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn monitor(id: &str) -> Task {
        Task::monitor(ServerId::new(id))
    }

    #[tokio::test]
    async fn enqueue_and_take() {
        let queue = MemoryTaskQueue::new(10);
        let handle = queue.enqueue(monitor("s1"), Duration::ZERO).await.unwrap();

        assert_eq!(queue.pending_count().await, 1);
        assert!(queue.is_pending("install:s1"));

        let delivery = queue.try_next().await.expect("task due");
        assert_eq!(delivery.handle, handle);
        assert_eq!(delivery.task, monitor("s1"));
        assert_eq!(queue.pending_count().await, 0);
        assert!(!queue.is_pending("install:s1"));
    }

    #[tokio::test]
    async fn same_key_collapses_while_pending() {
        let queue = MemoryTaskQueue::new(10);
        let first = queue.enqueue(monitor("s1"), Duration::ZERO).await.unwrap();
        let second = queue
            .enqueue(monitor("s1").next_attempt(), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(queue.pending_count().await, 1);

        queue.try_next().await.expect("task due");
        let third = queue.enqueue(monitor("s1"), Duration::ZERO).await.unwrap();
        assert_ne!(first.id, third.id);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_task_is_not_due_early() {
        let queue = MemoryTaskQueue::new(10);
        queue
            .enqueue(monitor("s1"), Duration::from_secs(30))
            .await
            .unwrap();

        assert!(queue.try_next().await.is_none());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(queue.try_next().await.is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(queue.try_next().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_task_first() {
        let queue = MemoryTaskQueue::new(10);
        queue
            .enqueue(monitor("late"), Duration::from_secs(60))
            .await
            .unwrap();
        queue
            .enqueue(monitor("early"), Duration::from_secs(5))
            .await
            .unwrap();

        let first = queue.next().await;
        assert_eq!(first.task.server_id().as_str(), "early");
        let second = queue.next().await;
        assert_eq!(second.task.server_id().as_str(), "late");
    }

    #[tokio::test]
    async fn queue_full() {
        let queue = MemoryTaskQueue::new(2);
        queue.enqueue(monitor("s1"), Duration::ZERO).await.unwrap();
        queue.enqueue(monitor("s2"), Duration::ZERO).await.unwrap();

        let result = queue.enqueue(monitor("s3"), Duration::ZERO).await;
        assert!(matches!(result, Err(ControlError::QueueFull)));

        let dedup = queue.enqueue(monitor("s1"), Duration::ZERO).await;
        assert!(dedup.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blocking_next_receives_notification() {
        let queue = Arc::new(MemoryTaskQueue::new(10));
        let queue_clone = Arc::clone(&queue);

        let waiter = tokio::spawn(async move { queue_clone.next().await });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let handle = queue.enqueue(monitor("s1"), Duration::ZERO).await.unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("timeout")
            .expect("task");
        assert_eq!(delivery.handle, handle);
    }

    #[test]
    fn deploy_tasks_key_on_request() {
        let a = Task::deploy(ServerId::new("s1"), BillingPeriod::Daily, DeployOptions::default());
        let b = Task::deploy(ServerId::new("s1"), BillingPeriod::Daily, DeployOptions::default());

        assert_ne!(a.dedup_key(), b.dedup_key());
        assert!(a.dedup_key().starts_with("deploy:"));
        assert_eq!(a.clone().next_attempt().dedup_key(), a.dedup_key());
        assert_eq!(a.next_attempt().attempt(), 1);
    }

    #[test]
    fn task_serializes_with_type_tag() {
        let json = serde_json::to_value(monitor("s1")).unwrap();
        assert_eq!(json["type"], "monitor_install");
        assert_eq!(json["server_id"], "s1");
        assert_eq!(json["attempt"], 0);
    }
}
