//! Deploy now if installed, otherwise defer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{ControlError, ControlResult};
use crate::panel::{with_timeout, ProvisioningClient};
use crate::queue::{Task, TaskHandle, TaskQueue};
use crate::store::ServerStore;
use crate::types::{BillingPeriod, DeployOptions, ServerRecord, ServerStatus};

use super::deployer::ServerDeployer;
use super::precheck::PreCheck;

/// Fresh lookup of a server's installation state.
#[async_trait]
pub trait InstallStateQuery: Send + Sync {
    /// Returns true if the server has finished installing.
    ///
    /// Fails with [`ControlError::DeploymentForbidden`] if the remote side
    /// reports the server as suspended.
    async fn is_installed(&self, server: &ServerRecord) -> ControlResult<bool>;
}

/// Asks the panel on every call.
pub struct PanelInstallState {
    panel: Arc<dyn ProvisioningClient>,
    timeout: Duration,
}

impl PanelInstallState {
    /// Create a query backed by the given panel.
    pub fn new(panel: Arc<dyn ProvisioningClient>, timeout: Duration) -> Self {
        Self { panel, timeout }
    }
}

#[async_trait]
impl InstallStateQuery for PanelInstallState {
    async fn is_installed(&self, server: &ServerRecord) -> ControlResult<bool> {
        let status = with_timeout(self.timeout, self.panel.server_status(server.panel_id)).await?;
        if status.suspended {
            return Err(ControlError::DeploymentForbidden {
                server: server.id.clone(),
                reason: "server is suspended on the panel",
            });
        }
        Ok(status.installed)
    }
}

/// Query install state, recording a suspension reported by the panel.
pub(super) async fn query_installed(
    installed: &dyn InstallStateQuery,
    store: &dyn ServerStore,
    server: &ServerRecord,
) -> ControlResult<bool> {
    match installed.is_installed(server).await {
        Err(e @ ControlError::DeploymentForbidden { .. }) => {
            warn!(server_id = %server.id, error = %e, "panel refuses deployment");
            store.set_status(&server.id, ServerStatus::Suspended).await?;
            Err(e)
        }
        other => other,
    }
}

/// What [`AutoDeployment::handle`] did.
#[derive(Debug, Clone)]
pub enum AutoDeployOutcome {
    /// The server was installed and has been deployed.
    Deployed(ServerRecord),
    /// The server is still installing; deployment was queued.
    Deferred(TaskHandle),
}

/// Entry point for deployments that may arrive before installation ends.
pub struct AutoDeployment {
    store: Arc<dyn ServerStore>,
    precheck: Arc<dyn PreCheck>,
    installed: Arc<dyn InstallStateQuery>,
    deployer: Arc<dyn ServerDeployer>,
    queue: Arc<dyn TaskQueue>,
}

impl AutoDeployment {
    /// Create a new auto deployment service.
    pub fn new(
        store: Arc<dyn ServerStore>,
        precheck: Arc<dyn PreCheck>,
        installed: Arc<dyn InstallStateQuery>,
        deployer: Arc<dyn ServerDeployer>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            store,
            precheck,
            installed,
            deployer,
            queue,
        }
    }

    /// Deploy `server` synchronously if installed, otherwise queue the
    /// deployment and return immediately.
    ///
    /// The stored record is reloaded before the pre-check, so a caller's
    /// stale copy cannot bypass a suspension.
    pub async fn handle(
        &self,
        server: &ServerRecord,
        period: BillingPeriod,
        options: DeployOptions,
    ) -> ControlResult<AutoDeployOutcome> {
        let server = self
            .store
            .get(&server.id)
            .await?
            .ok_or_else(|| ControlError::ServerNotFound(server.id.to_string()))?;

        self.precheck.check(&server)?;

        if query_installed(self.installed.as_ref(), self.store.as_ref(), &server).await? {
            let record = self.deployer.deploy(&server, period, options).await?;
            return Ok(AutoDeployOutcome::Deployed(record));
        }

        let handle = self
            .queue
            .enqueue(
                Task::deploy(server.id.clone(), period, options),
                Duration::ZERO,
            )
            .await?;

        info!(server_id = %server.id, task_id = %handle.id, "server still installing, deployment deferred");
        Ok(AutoDeployOutcome::Deferred(handle))
    }
}

impl std::fmt::Debug for AutoDeployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoDeployment").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::deployment::StatusPreCheck;
    use crate::panel::MockPanel;
    use crate::queue::MemoryTaskQueue;
    use crate::store::MemoryStore;
    use crate::testing;

    #[derive(Default)]
    struct CountingDeployer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ServerDeployer for CountingDeployer {
        async fn deploy(
            &self,
            server: &ServerRecord,
            period: BillingPeriod,
            _options: DeployOptions,
        ) -> ControlResult<ServerRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut record = server.clone();
            record.billing_period = period;
            Ok(record)
        }
    }

    struct FixedState {
        installed: ControlResult<bool>,
        calls: AtomicUsize,
    }

    impl FixedState {
        fn new(installed: ControlResult<bool>) -> Self {
            Self {
                installed,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl InstallStateQuery for FixedState {
        async fn is_installed(&self, _server: &ServerRecord) -> ControlResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.installed {
                Ok(installed) => Ok(*installed),
                Err(_) => Err(ControlError::panel("get server failed: 502")),
            }
        }
    }

    struct Harness {
        auto: AutoDeployment,
        store: Arc<MemoryStore>,
        state: Arc<FixedState>,
        deployer: Arc<CountingDeployer>,
        queue: Arc<MemoryTaskQueue>,
    }

    impl Harness {
        async fn seed(&self, status: ServerStatus) -> ServerRecord {
            let server = testing::record(status);
            self.store.insert(&server).await.unwrap();
            server
        }
    }

    fn harness(installed: ControlResult<bool>) -> Harness {
        let state = Arc::new(FixedState::new(installed));
        let deployer = Arc::new(CountingDeployer::default());
        let queue = Arc::new(MemoryTaskQueue::new(10));
        let store = Arc::new(MemoryStore::new());

        let auto = AutoDeployment::new(
            Arc::clone(&store) as _,
            Arc::new(StatusPreCheck),
            Arc::clone(&state) as _,
            Arc::clone(&deployer) as _,
            Arc::clone(&queue) as _,
        );

        Harness {
            auto,
            store,
            state,
            deployer,
            queue,
        }
    }

    #[tokio::test]
    async fn installed_server_deploys_synchronously() {
        let h = harness(Ok(true));
        let server = h.seed(ServerStatus::Active).await;

        let outcome = h
            .auto
            .handle(&server, BillingPeriod::Weekly, DeployOptions::default())
            .await
            .unwrap();

        match outcome {
            AutoDeployOutcome::Deployed(record) => {
                assert_eq!(record.billing_period, BillingPeriod::Weekly);
            }
            other => panic!("expected deployed, got {other:?}"),
        }
        assert_eq!(h.deployer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn installing_server_is_deferred() {
        let h = harness(Ok(false));
        let server = h.seed(ServerStatus::Active).await;
        let options = DeployOptions {
            resources: None,
            start: true,
        };

        let outcome = h
            .auto
            .handle(&server, BillingPeriod::Monthly, options)
            .await
            .unwrap();

        let AutoDeployOutcome::Deferred(handle) = outcome else {
            panic!("expected deferred");
        };
        assert_eq!(h.deployer.calls.load(Ordering::SeqCst), 0);

        let delivery = h.queue.try_next().await.expect("task queued");
        assert_eq!(delivery.handle, handle);
        match delivery.task {
            Task::DeployServer {
                server_id,
                period,
                options: queued,
                attempt,
                ..
            } => {
                assert_eq!(server_id, server.id);
                assert_eq!(period, BillingPeriod::Monthly);
                assert_eq!(queued, options);
                assert_eq!(attempt, 0);
            }
            other => panic!("unexpected task {other:?}"),
        }
    }

    #[tokio::test]
    async fn forbidden_server_touches_nothing() {
        let h = harness(Ok(true));
        let server = h.seed(ServerStatus::Suspended).await;

        let result = h
            .auto
            .handle(&server, BillingPeriod::Daily, DeployOptions::default())
            .await;

        assert!(matches!(
            result,
            Err(ControlError::DeploymentForbidden { .. })
        ));
        assert_eq!(h.state.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.deployer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn state_query_failure_propagates() {
        let h = harness(Err(ControlError::panel("unused")));
        let server = h.seed(ServerStatus::Active).await;

        let result = h
            .auto
            .handle(&server, BillingPeriod::Daily, DeployOptions::default())
            .await;

        assert!(matches!(result, Err(ControlError::Panel(_))));
        assert_eq!(h.queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn each_call_queries_fresh_state() {
        let h = harness(Ok(false));
        let server = h.seed(ServerStatus::Active).await;

        for _ in 0..2 {
            h.auto
                .handle(&server, BillingPeriod::Daily, DeployOptions::default())
                .await
                .unwrap();
        }

        assert_eq!(h.state.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.queue.pending_count().await, 2);
    }

    #[tokio::test]
    async fn stored_suspension_wins_over_stale_copy() {
        let h = harness(Ok(true));
        let stale = h.seed(ServerStatus::Active).await;
        h.store
            .set_status(&stale.id, ServerStatus::Suspended)
            .await
            .unwrap();

        let result = h
            .auto
            .handle(&stale, BillingPeriod::Daily, DeployOptions::default())
            .await;

        assert!(matches!(
            result,
            Err(ControlError::DeploymentForbidden { .. })
        ));
        assert_eq!(h.deployer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_server_is_not_found() {
        let h = harness(Ok(true));
        let unsaved = testing::record(ServerStatus::Active);

        let result = h
            .auto
            .handle(&unsaved, BillingPeriod::Daily, DeployOptions::default())
            .await;

        assert!(matches!(result, Err(ControlError::ServerNotFound(_))));
        assert_eq!(h.state.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panel_state_reads_installed_flag() {
        let panel = Arc::new(MockPanel::new());
        panel.set_installed(512, true);
        let state = PanelInstallState::new(panel, Duration::from_secs(5));

        let server = testing::record(ServerStatus::Active);
        assert!(state.is_installed(&server).await.unwrap());
    }

    #[tokio::test]
    async fn panel_suspension_is_recorded_and_refused() {
        let panel = Arc::new(MockPanel::new());
        panel.set_installed(512, true);
        panel.set_suspended(512, true);
        let store = Arc::new(MemoryStore::new());
        let deployer = Arc::new(CountingDeployer::default());

        let auto = AutoDeployment::new(
            Arc::clone(&store) as _,
            Arc::new(StatusPreCheck),
            Arc::new(PanelInstallState::new(panel, Duration::from_secs(5))),
            Arc::clone(&deployer) as _,
            Arc::new(MemoryTaskQueue::new(10)),
        );
        let server = testing::record(ServerStatus::Active);
        store.insert(&server).await.unwrap();

        let result = auto
            .handle(&server, BillingPeriod::Daily, DeployOptions::default())
            .await;

        assert!(matches!(
            result,
            Err(ControlError::DeploymentForbidden { reason, .. }) if reason == "server is suspended on the panel"
        ));
        assert_eq!(deployer.calls.load(Ordering::SeqCst), 0);
        let stored = store.get(&server.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ServerStatus::Suspended);
    }
}
