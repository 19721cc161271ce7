//! Queued deployments waiting for installation to finish.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::{ControlError, ControlResult};
use crate::queue::{Task, TaskQueue};
use crate::store::ServerStore;
use crate::types::{BillingPeriod, DeployOptions, ServerId};

use super::auto::{query_installed, InstallStateQuery};
use super::deployer::ServerDeployer;
use super::precheck::PreCheck;

/// Result of one deferred deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredOutcome {
    /// The server was deployed by this run.
    Deployed,
    /// An earlier delivery of the same request already deployed.
    AlreadyDeployed,
    /// Still installing; the task was queued again.
    Rescheduled {
        /// Attempt number of the queued task.
        attempt: u32,
        /// Delay before the queued task.
        delay: Duration,
    },
    /// Gave up, or the server no longer exists.
    Abandoned,
}

/// A deployment request carried by a queued task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    /// Identifies the request across redeliveries.
    pub request_id: String,
    /// Server to deploy.
    pub server_id: ServerId,
    /// Billing period to charge.
    pub period: BillingPeriod,
    /// Deployment options.
    pub options: DeployOptions,
    /// Zero-based attempt number.
    pub attempt: u32,
}

impl DeployRequest {
    fn into_task(self) -> Task {
        Task::DeployServer {
            request_id: self.request_id,
            server_id: self.server_id,
            period: self.period,
            options: self.options,
            attempt: self.attempt,
        }
    }
}

/// Runs deployments that were deferred while a server was installing.
///
/// A request deploys at most once: the store claim on its request id
/// guards against redelivered or overlapping tasks.
pub struct DeferredDeployment {
    store: Arc<dyn ServerStore>,
    precheck: Arc<dyn PreCheck>,
    installed: Arc<dyn InstallStateQuery>,
    deployer: Arc<dyn ServerDeployer>,
    queue: Arc<dyn TaskQueue>,
    config: MonitorConfig,
}

impl DeferredDeployment {
    /// Create a new deferred deployment handler.
    pub fn new(
        store: Arc<dyn ServerStore>,
        precheck: Arc<dyn PreCheck>,
        installed: Arc<dyn InstallStateQuery>,
        deployer: Arc<dyn ServerDeployer>,
        queue: Arc<dyn TaskQueue>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            precheck,
            installed,
            deployer,
            queue,
            config,
        }
    }

    /// Run one attempt of a deferred deployment.
    pub async fn run(&self, request: DeployRequest) -> ControlResult<DeferredOutcome> {
        let server_id = request.server_id.clone();

        let Some(server) = self.store.get(&server_id).await? else {
            warn!(server_id = %server_id, request_id = %request.request_id, "server vanished, dropping deployment");
            return Ok(DeferredOutcome::Abandoned);
        };

        self.precheck.check(&server)?;

        let installed = match query_installed(self.installed.as_ref(), self.store.as_ref(), &server)
            .await
        {
            Ok(installed) => installed,
            Err(e @ ControlError::DeploymentForbidden { .. }) => return Err(e),
            Err(e) => {
                warn!(server_id = %server_id, error = %e, "install state query failed");
                false
            }
        };

        if !installed {
            return self.reschedule(request).await;
        }

        if !self
            .store
            .claim_deployment(&server_id, &request.request_id)
            .await?
        {
            debug!(server_id = %server_id, request_id = %request.request_id, "deployment already handled");
            return Ok(DeferredOutcome::AlreadyDeployed);
        }

        match self
            .deployer
            .deploy(&server, request.period, request.options)
            .await
        {
            Ok(_) => {
                info!(server_id = %server_id, request_id = %request.request_id, "deferred deployment completed");
                Ok(DeferredOutcome::Deployed)
            }
            Err(e) => {
                if let Err(release) = self
                    .store
                    .release_deployment(&server_id, &request.request_id)
                    .await
                {
                    error!(server_id = %server_id, error = %release, "failed to release deployment claim");
                }
                Err(e)
            }
        }
    }

    async fn reschedule(&self, request: DeployRequest) -> ControlResult<DeferredOutcome> {
        let attempt = request.attempt;
        let next = attempt.saturating_add(1);

        if next >= self.config.max_attempts {
            let timeout = ControlError::InstallTimeout {
                server: request.server_id.clone(),
                attempts: next,
            };
            error!(
                server_id = %request.server_id,
                request_id = %request.request_id,
                error = %timeout,
                "giving up on deferred deployment"
            );
            return Ok(DeferredOutcome::Abandoned);
        }

        let delay = self.config.delay_for(attempt);
        let task = DeployRequest {
            attempt: next,
            ..request
        }
        .into_task();
        self.queue.enqueue(task, delay).await?;

        Ok(DeferredOutcome::Rescheduled {
            attempt: next,
            delay,
        })
    }
}

impl std::fmt::Debug for DeferredDeployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredDeployment")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
