//! Server creation orchestration.
//!
//! Creating a server runs the billing checks, reserves an allocation, asks
//! the panel to create the server and records it locally. Installation is
//! not awaited: an install monitor task is queued instead.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::allocation::{AllocationClaim, AllocationSelector};
use crate::billing::{CostEvaluator, LimitGuard};
use crate::deploy_config::DeployConfigBuilder;
use crate::error::{ControlError, ControlResult};
use crate::panel::{with_timeout, ProvisioningClient};
use crate::queue::{Task, TaskQueue};
use crate::state::{Draft, Provisioned, ServerBuild, ServerDraft};
use crate::store::{Ledger, ServerStore};
use crate::types::{Game, Node, ServerForm, ServerId, ServerRecord, User, UserId};

/// Collaborators of a [`ServerCreator`].
pub struct CreatorParts {
    /// Server limit check.
    pub limits: Arc<dyn LimitGuard>,
    /// Period pricing.
    pub costs: Arc<dyn CostEvaluator>,
    /// Balance lookup.
    pub ledger: Arc<dyn Ledger>,
    /// Allocation reservations.
    pub allocations: Arc<dyn AllocationSelector>,
    /// Panel spec construction.
    pub builder: Arc<dyn DeployConfigBuilder>,
    /// Remote panel.
    pub panel: Arc<dyn ProvisioningClient>,
    /// Server records.
    pub store: Arc<dyn ServerStore>,
    /// Deferred tasks.
    pub queue: Arc<dyn TaskQueue>,
}

/// Orchestrates the creation of new servers.
pub struct ServerCreator {
    parts: CreatorParts,
    timeout: Duration,
    first_poll: Duration,
    user_locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl ServerCreator {
    /// Create a new server creator.
    ///
    /// `timeout` bounds each panel call and `first_poll` delays the first
    /// install poll.
    pub fn new(parts: CreatorParts, timeout: Duration, first_poll: Duration) -> Self {
        Self {
            parts,
            timeout,
            first_poll,
            user_locks: DashMap::new(),
        }
    }

    /// Create a server for `user` running `game` on `node`.
    ///
    /// This orchestrates the full creation:
    /// 1. Check the user's server limit
    /// 2. Check the period cost against the user's balance
    /// 3. Reserve an allocation
    /// 4. Build the panel spec and create the server remotely
    /// 5. Record the server locally
    /// 6. Queue one install monitor task
    ///
    /// If any step up to the remote creation fails, nothing is recorded and
    /// the allocation is returned to the free pool.
    pub async fn create(
        &self,
        user: &User,
        game: &Game,
        node: &Node,
        form: &ServerForm,
    ) -> ControlResult<ServerRecord> {
        info!(
            user_id = %user.id,
            game = %game.id,
            node = %node.id,
            period = %form.billing_period,
            "creating server"
        );

        // Held until the record is stored so concurrent requests of one user
        // see each other's servers in the limit check.
        let lock = self.user_lock(&user.id);
        let result = {
            let _guard = lock.lock().await;
            self.create_locked(user, game, node, form).await
        };

        drop(lock);
        self.user_locks
            .remove_if(&user.id, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn create_locked(
        &self,
        user: &User,
        game: &Game,
        node: &Node,
        form: &ServerForm,
    ) -> ControlResult<ServerRecord> {
        self.parts.limits.check(user).await?;
        self.check_funds(user, game, form).await?;

        let claim = self.parts.allocations.select(node, game).await?;
        debug!(allocation = %claim.allocation, "allocation claimed");

        let build = match self.provision(user, game, node, form, &claim).await {
            Ok(build) => build,
            Err(e) => {
                self.parts.allocations.release(&claim);
                warn!(user_id = %user.id, error = %e, "server creation failed");
                return Err(e);
            }
        };

        self.parts.allocations.confirm(&claim);

        let panel_id = build.resource().id;
        let record = build.into_record();

        if let Err(e) = self.parts.store.insert(&record).await {
            error!(
                server_id = %record.id,
                panel_id,
                panel_hash = %record.panel_hash,
                error = %e,
                "server created on panel but could not be recorded"
            );
            return Err(e);
        }

        self.queue_monitor(&record.id).await;

        info!(
            server_id = %record.id,
            panel_id,
            allocation = %record.allocation,
            "server created"
        );

        Ok(record)
    }

    async fn check_funds(&self, user: &User, game: &Game, form: &ServerForm) -> ControlResult<()> {
        let required = self.parts.costs.cost_per_period(game, form);
        let available = self.parts.ledger.balance(&user.id).await?;

        if required > available {
            return Err(ControlError::InsufficientFunds {
                required,
                available,
            });
        }
        Ok(())
    }

    async fn provision(
        &self,
        user: &User,
        game: &Game,
        node: &Node,
        form: &ServerForm,
        claim: &AllocationClaim,
    ) -> ControlResult<ServerBuild<Provisioned>> {
        let spec = self
            .parts
            .builder
            .build(user, game, node, &claim.allocation, form);

        let draft = ServerBuild::<Draft>::new(ServerDraft {
            id: ServerId::generate(),
            user_id: user.id.clone(),
            game_id: game.id.clone(),
            node_id: node.id.clone(),
            name: spec.name.clone(),
            resources: form.resources,
            billing_period: form.billing_period,
            allocation: claim.allocation.clone(),
        });

        debug!(server_id = %draft.id(), name = %spec.name, "requesting server from panel");

        let resource = with_timeout(self.timeout, self.parts.panel.create_server(&spec))
            .await?
            .ok_or_else(|| ControlError::provisioning("panel returned no server resource"))?;

        Ok(draft.provisioned(resource))
    }

    async fn queue_monitor(&self, server_id: &ServerId) {
        let task = Task::monitor(server_id.clone());
        if let Err(e) = self.parts.queue.enqueue(task, self.first_poll).await {
            error!(server_id = %server_id, error = %e, "failed to queue install monitor");
        }
    }

    fn user_lock(&self, user_id: &UserId) -> Arc<Mutex<()>> {
        Arc::clone(&self.user_locks.entry(user_id.clone()).or_default())
    }
}

impl std::fmt::Debug for ServerCreator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCreator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
