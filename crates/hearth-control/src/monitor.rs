//! Deferred polling of a new server's installation.
//!
//! ```text
//! Polling ──▶ Installed
//!    │
//!    ├──────▶ Rescheduled ──▶ Polling
//!    │
//!    └──────▶ Abandoned
//! ```
//!
//! Each run polls the panel once. Runs may overlap or repeat; marking the
//! server installed is a compare-and-set in the store, so only one run ever
//! completes the installation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::{ControlError, ControlResult};
use crate::panel::{with_timeout, ProvisioningClient};
use crate::queue::{Task, TaskQueue};
use crate::store::ServerStore;
use crate::types::ServerId;

/// Result of one monitor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// This run saw the server installed and completed it.
    Installed,
    /// Another run already completed the installation.
    AlreadyInstalled,
    /// Not installed yet; a follow-up poll is queued.
    Rescheduled {
        /// Attempt number of the queued poll.
        attempt: u32,
        /// Delay before the queued poll.
        delay: Duration,
    },
    /// Gave up, or the server no longer exists.
    Abandoned,
}

/// Polls the panel until a server reports installed.
pub struct InstallMonitor {
    store: Arc<dyn ServerStore>,
    panel: Arc<dyn ProvisioningClient>,
    queue: Arc<dyn TaskQueue>,
    config: MonitorConfig,
    timeout: Duration,
}

impl InstallMonitor {
    /// Create a new install monitor.
    pub fn new(
        store: Arc<dyn ServerStore>,
        panel: Arc<dyn ProvisioningClient>,
        queue: Arc<dyn TaskQueue>,
        config: MonitorConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            panel,
            queue,
            config,
            timeout,
        }
    }

    /// Poll once for the given zero-based attempt.
    ///
    /// Panel failures count as "not installed". Store and queue failures
    /// are returned so the task can be redelivered.
    pub async fn run(&self, server_id: &ServerId, attempt: u32) -> ControlResult<MonitorOutcome> {
        let Some(record) = self.store.get(server_id).await? else {
            warn!(server_id = %server_id, "server vanished, stopping install monitor");
            return Ok(MonitorOutcome::Abandoned);
        };

        if record.installed_at.is_some() {
            debug!(server_id = %server_id, "already installed");
            return Ok(MonitorOutcome::AlreadyInstalled);
        }

        let installed = match with_timeout(self.timeout, self.panel.server_status(record.panel_id))
            .await
        {
            Ok(status) => status.installed,
            Err(e) => {
                warn!(server_id = %server_id, attempt, error = %e, "install poll failed");
                false
            }
        };

        if installed {
            return if self.store.mark_installed(server_id, Utc::now()).await? {
                info!(server_id = %server_id, panel_id = record.panel_id, attempt, "server installed");
                Ok(MonitorOutcome::Installed)
            } else {
                debug!(server_id = %server_id, "installation completed by another run");
                Ok(MonitorOutcome::AlreadyInstalled)
            };
        }

        let next = attempt.saturating_add(1);
        if next < self.config.max_attempts {
            let delay = self.config.delay_for(attempt);
            let task = Task::MonitorInstall {
                server_id: server_id.clone(),
                attempt: next,
            };
            self.queue.enqueue(task, delay).await?;
            debug!(server_id = %server_id, attempt = next, delay = ?delay, "install poll rescheduled");
            return Ok(MonitorOutcome::Rescheduled {
                attempt: next,
                delay,
            });
        }

        let timeout = ControlError::InstallTimeout {
            server: server_id.clone(),
            attempts: next,
        };
        error!(server_id = %server_id, error = %timeout, "giving up on installation");
        Ok(MonitorOutcome::Abandoned)
    }
}

impl std::fmt::Debug for InstallMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::config::Backoff;
    use crate::panel::MockPanel;
    use crate::queue::MemoryTaskQueue;
    use crate::store::MemoryStore;
    use crate::types::{
        Allocation, BillingPeriod, GameId, NodeId, Resources, ServerRecord, ServerStatus, UserId,
    };

    struct Harness {
        monitor: InstallMonitor,
        panel: Arc<MockPanel>,
        store: Arc<MemoryStore>,
        queue: Arc<MemoryTaskQueue>,
    }

    fn harness(max_attempts: u32) -> Harness {
        let panel = Arc::new(MockPanel::new());
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryTaskQueue::new(100));
        let config = MonitorConfig {
            backoff: Backoff::Exponential,
            base_delay_secs: 10,
            max_delay_secs: 60,
            max_attempts,
        };

        let monitor = InstallMonitor::new(
            Arc::clone(&store) as _,
            Arc::clone(&panel) as _,
            Arc::clone(&queue) as _,
            config,
            Duration::from_secs(5),
        );

        Harness {
            monitor,
            panel,
            store,
            queue,
        }
    }

    fn record(panel_id: u64, installed_at: Option<DateTime<Utc>>) -> ServerRecord {
        let now = Utc::now();
        ServerRecord {
            id: ServerId::generate(),
            user_id: UserId::new("user-1"),
            game_id: GameId::new("mc"),
            node_id: NodeId::new("node-1"),
            name: "mc-alice".to_owned(),
            resources: Resources {
                cpu: 100,
                memory: 512,
                disk: 2000,
                databases: 0,
            },
            billing_period: BillingPeriod::Daily,
            allocation: Allocation {
                id: 1,
                ip: "10.0.0.1".to_owned(),
                port: 25565,
            },
            panel_id,
            panel_hash: "random_hash".to_owned(),
            status: ServerStatus::Active,
            installed_at,
            paid_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn seed(h: &Harness, installed: bool) -> ServerId {
        let record = record(512, None);
        h.store.insert(&record).await.unwrap();
        h.panel.set_installed(512, installed);
        record.id
    }

    #[tokio::test]
    async fn installed_server_is_completed() {
        let h = harness(5);
        let id = seed(&h, true).await;

        let outcome = h.monitor.run(&id, 0).await.unwrap();

        assert_eq!(outcome, MonitorOutcome::Installed);
        let stored = h.store.get(&id).await.unwrap().unwrap();
        assert!(stored.installed_at.is_some());
        assert_eq!(h.queue.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_install_is_rescheduled_with_backoff() {
        let h = harness(5);
        let id = seed(&h, false).await;

        let outcome = h.monitor.run(&id, 2).await.unwrap();

        assert_eq!(
            outcome,
            MonitorOutcome::Rescheduled {
                attempt: 3,
                delay: Duration::from_secs(40),
            }
        );
        assert!(h.queue.try_next().await.is_none());

        tokio::time::advance(Duration::from_secs(40)).await;
        let delivery = h.queue.try_next().await.expect("follow-up queued");
        assert_eq!(
            delivery.task,
            Task::MonitorInstall {
                server_id: id,
                attempt: 3
            }
        );
    }

    #[tokio::test]
    async fn last_attempt_abandons() {
        let h = harness(3);
        let id = seed(&h, false).await;

        let outcome = h.monitor.run(&id, 2).await.unwrap();

        assert_eq!(outcome, MonitorOutcome::Abandoned);
        assert_eq!(h.queue.pending_count().await, 0);
        assert!(h.store.get(&id).await.unwrap().unwrap().installed_at.is_none());
    }

    #[tokio::test]
    async fn poll_failure_counts_as_not_installed() {
        let h = harness(5);
        let id = seed(&h, true).await;
        h.panel.set_status_failing(true);

        let outcome = h.monitor.run(&id, 0).await.unwrap();

        assert!(matches!(outcome, MonitorOutcome::Rescheduled { attempt: 1, .. }));
        assert!(h.store.get(&id).await.unwrap().unwrap().installed_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_timeout_counts_as_not_installed() {
        let h = harness(5);
        let id = seed(&h, true).await;
        h.panel.set_latency(Some(Duration::from_secs(30)));

        let outcome = h.monitor.run(&id, 0).await.unwrap();

        assert!(matches!(outcome, MonitorOutcome::Rescheduled { .. }));
    }

    #[tokio::test]
    async fn already_installed_skips_panel() {
        let h = harness(5);
        let record = record(512, Some(Utc::now()));
        h.store.insert(&record).await.unwrap();

        let outcome = h.monitor.run(&record.id, 0).await.unwrap();

        assert_eq!(outcome, MonitorOutcome::AlreadyInstalled);
        assert_eq!(h.panel.status_calls(), 0);
    }

    #[tokio::test]
    async fn missing_server_abandons() {
        let h = harness(5);
        let outcome = h
            .monitor
            .run(&ServerId::new("gone"), 0)
            .await
            .unwrap();
        assert_eq!(outcome, MonitorOutcome::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_polls_share_one_follow_up() {
        let h = harness(5);
        let id = seed(&h, false).await;

        let (first, second) = tokio::join!(h.monitor.run(&id, 0), h.monitor.run(&id, 0));
        assert!(matches!(first.unwrap(), MonitorOutcome::Rescheduled { attempt: 1, .. }));
        assert!(matches!(second.unwrap(), MonitorOutcome::Rescheduled { attempt: 1, .. }));
        assert_eq!(h.queue.pending_count().await, 1);

        h.panel.set_installed(512, true);
        let mut outcomes = Vec::new();
        while h.queue.pending_count().await > 0 {
            let delivery = h.queue.next().await;
            let Task::MonitorInstall { server_id, attempt } = delivery.task else {
                panic!("unexpected task {:?}", delivery.task);
            };
            outcomes.push(h.monitor.run(&server_id, attempt).await.unwrap());
        }

        assert_eq!(outcomes, vec![MonitorOutcome::Installed]);
        assert!(h.store.get(&id).await.unwrap().unwrap().installed_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_runs_complete_once() {
        let h = Arc::new(harness(5));
        let id = seed(&h, true).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let h = Arc::clone(&h);
                let id = id.clone();
                tokio::spawn(async move { h.monitor.run(&id, 0).await })
            })
            .collect();

        let mut installed = 0;
        for handle in handles {
            match handle.await.expect("task").expect("run") {
                MonitorOutcome::Installed => installed += 1,
                MonitorOutcome::AlreadyInstalled => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(installed, 1);
    }
}
