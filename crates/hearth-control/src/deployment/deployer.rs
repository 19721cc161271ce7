//! Deployment of an installed server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::billing::CostEvaluator;
use crate::deploy_config::build_spec;
use crate::error::{ControlError, ControlResult};
use crate::panel::{with_timeout, PowerSignal, ProvisioningClient};
use crate::store::{Catalog, Ledger, ServerStore};
use crate::types::{
    BillingPeriod, DeployOptions, Resources, ServerForm, ServerRecord, Transaction,
};

/// Deploys servers that have finished installing.
#[async_trait]
pub trait ServerDeployer: Send + Sync {
    /// Deploy `server` for one `period`, returning the updated record.
    ///
    /// Implementations work from the stored record; `server` only names it.
    async fn deploy(
        &self,
        server: &ServerRecord,
        period: BillingPeriod,
        options: DeployOptions,
    ) -> ControlResult<ServerRecord>;
}

/// Deployer that charges the ledger and drives the panel.
pub struct PanelDeployer {
    catalog: Arc<dyn Catalog>,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn ServerStore>,
    panel: Arc<dyn ProvisioningClient>,
    costs: Arc<dyn CostEvaluator>,
    timeout: Duration,
}

impl PanelDeployer {
    /// Create a new panel deployer.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn ServerStore>,
        panel: Arc<dyn ProvisioningClient>,
        costs: Arc<dyn CostEvaluator>,
        timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            ledger,
            store,
            panel,
            costs,
            timeout,
        }
    }
}

impl PanelDeployer {
    async fn apply(
        &self,
        server: &ServerRecord,
        resources: Resources,
        start: bool,
    ) -> ControlResult<()> {
        if resources != server.resources {
            let build = build_spec(&server.allocation, &resources);
            with_timeout(self.timeout, self.panel.update_build(server.panel_id, &build)).await?;
            debug!(server_id = %server.id, "build limits updated");
        }

        if start {
            with_timeout(
                self.timeout,
                self.panel.power(&server.panel_hash, PowerSignal::Start),
            )
            .await?;
            debug!(server_id = %server.id, "start signal sent");
        }

        Ok(())
    }
}

#[async_trait]
impl ServerDeployer for PanelDeployer {
    async fn deploy(
        &self,
        server: &ServerRecord,
        period: BillingPeriod,
        options: DeployOptions,
    ) -> ControlResult<ServerRecord> {
        let server = self
            .store
            .get(&server.id)
            .await?
            .ok_or_else(|| ControlError::ServerNotFound(server.id.to_string()))?;

        let user = self
            .catalog
            .user(&server.user_id)
            .await?
            .ok_or_else(|| ControlError::UserNotFound(server.user_id.to_string()))?;
        let game = self
            .catalog
            .game(&server.game_id)
            .await?
            .ok_or_else(|| ControlError::GameNotFound(server.game_id.to_string()))?;

        let resources = options.resources.unwrap_or(server.resources);
        let cost = self.costs.cost_per_period(
            &game,
            &ServerForm {
                billing_period: period,
                resources,
            },
        );

        info!(server_id = %server.id, user_id = %user.id, period = %period, cost = %cost, "deploying server");

        let description = format!("{} deployment of {}", period, server.name);
        self.ledger.debit(&user.id, cost, &description).await?;

        if let Err(e) = self.apply(&server, resources, options.start).await {
            warn!(server_id = %server.id, error = %e, "deployment failed on panel, refunding");
            let refund = Transaction::new(user.id.clone(), cost, format!("refund: {description}"));
            if let Err(refund_error) = self.ledger.append(&refund).await {
                error!(
                    server_id = %server.id,
                    user_id = %user.id,
                    cost = %cost,
                    error = %refund_error,
                    "failed to refund deployment charge"
                );
            }
            return Err(e);
        }

        let now = Utc::now();
        let paid_from = server.paid_until.filter(|t| *t > now).unwrap_or(now);
        let updated = self
            .store
            .record_deployment(&server.id, resources, period, paid_from + period.duration())
            .await?;

        info!(
            server_id = %server.id,
            paid_until = ?updated.paid_until,
            "server deployed"
        );

        Ok(updated)
    }
}

impl std::fmt::Debug for PanelDeployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelDeployer")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
