//! Service lifecycle management.
//!
//! Wires the provisioning components together, runs the task worker and
//! serves the health endpoints until a shutdown signal arrives.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::allocation::PanelAllocationSelector;
use crate::billing::{RateCostEvaluator, StoreLimitGuard};
use crate::config::ControlConfig;
use crate::creation::{CreatorParts, ServerCreator};
use crate::deploy_config::PanelSpecBuilder;
use crate::deployment::{
    AutoDeployment, DeferredDeployment, PanelDeployer, PanelInstallState, StatusPreCheck,
};
use crate::error::{ControlError, ControlResult};
use crate::monitor::InstallMonitor;
use crate::panel::{create_client, ProvisioningClient};
use crate::queue::MemoryTaskQueue;
use crate::store::MemoryStore;
use crate::worker::TaskWorker;

/// The provisioning components, wired together.
pub struct Provisioning {
    /// Entry point for new servers.
    pub creator: Arc<ServerCreator>,
    /// Entry point for deployments.
    pub auto: Arc<AutoDeployment>,
    /// Deferred task executor.
    pub worker: Arc<TaskWorker>,
    /// Deferred task queue.
    pub queue: Arc<MemoryTaskQueue>,
    /// Records, ledger and catalog.
    pub store: Arc<MemoryStore>,
}

impl Provisioning {
    /// Wire every component against the given store and panel.
    pub fn new(
        config: &ControlConfig,
        store: Arc<MemoryStore>,
        panel: Arc<dyn ProvisioningClient>,
    ) -> Self {
        let timeout = config.panel.request_timeout();
        let queue = Arc::new(MemoryTaskQueue::new(config.queue.max_size));
        let costs = Arc::new(RateCostEvaluator);
        let precheck = Arc::new(StatusPreCheck);
        let installed = Arc::new(PanelInstallState::new(Arc::clone(&panel), timeout));

        let creator = Arc::new(ServerCreator::new(
            CreatorParts {
                limits: Arc::new(StoreLimitGuard::new(Arc::clone(&store) as _)),
                costs: Arc::clone(&costs) as _,
                ledger: Arc::clone(&store) as _,
                allocations: Arc::new(PanelAllocationSelector::new(Arc::clone(&panel), timeout)),
                builder: Arc::new(PanelSpecBuilder),
                panel: Arc::clone(&panel),
                store: Arc::clone(&store) as _,
                queue: Arc::clone(&queue) as _,
            },
            timeout,
            config.monitor.delay_for(0),
        ));

        let deployer = Arc::new(PanelDeployer::new(
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            Arc::clone(&panel),
            costs,
            timeout,
        ));

        let auto = Arc::new(AutoDeployment::new(
            Arc::clone(&store) as _,
            Arc::clone(&precheck) as _,
            Arc::clone(&installed) as _,
            Arc::clone(&deployer) as _,
            Arc::clone(&queue) as _,
        ));

        let monitor = Arc::new(InstallMonitor::new(
            Arc::clone(&store) as _,
            Arc::clone(&panel),
            Arc::clone(&queue) as _,
            config.monitor.clone(),
            timeout,
        ));

        let deferred = Arc::new(DeferredDeployment::new(
            Arc::clone(&store) as _,
            precheck,
            installed,
            deployer,
            Arc::clone(&queue) as _,
            config.monitor.clone(),
        ));

        let worker = Arc::new(TaskWorker::new(
            Arc::clone(&queue),
            monitor,
            deferred,
            config.monitor.clone(),
        ));

        Self {
            creator,
            auto,
            worker,
            queue,
            store,
        }
    }
}

impl std::fmt::Debug for Provisioning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioning").finish_non_exhaustive()
    }
}

/// The control service.
///
/// Manages the lifecycle of the provisioning core, including:
/// - Panel client
/// - Deferred task worker
/// - Health endpoints
/// - Signal handling and graceful shutdown
pub struct ControlService {
    config: ControlConfig,
    cancel: CancellationToken,
}

impl ControlService {
    /// Create a new control service with the given configuration.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the control service until shutdown.
    pub async fn run(&self) -> ControlResult<()> {
        let panel = create_client(&self.config.panel)?;
        info!(
            panel_type = ?self.config.panel.panel_type,
            url = %self.config.panel.url,
            "panel client configured"
        );

        let provisioning = Provisioning::new(&self.config, Arc::new(MemoryStore::new()), panel);

        let worker = Arc::clone(&provisioning.worker);
        let worker_cancel = self.cancel.child_token();
        let worker_handle = tokio::spawn(async move { worker.run(worker_cancel).await });

        let app = router(AppState {
            queue: Arc::clone(&provisioning.queue),
            store: Arc::clone(&provisioning.store),
        });

        let listener = tokio::net::TcpListener::bind(self.config.server.listen)
            .await
            .map_err(|e| ControlError::Config(format!("failed to bind TCP: {e}")))?;

        info!(listen = %self.config.server.listen, "control service listening");

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| ControlError::Config(format!("server error: {e}")));

        self.cancel.cancel();
        if let Err(e) = worker_handle.await {
            error!(error = %e, "task worker panicked");
        }

        served?;
        info!("control service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Shared state of the health endpoints.
#[derive(Clone)]
pub struct AppState {
    /// Deferred task queue.
    pub queue: Arc<MemoryTaskQueue>,
    /// Server records.
    pub store: Arc<MemoryStore>,
}

/// Creates the health router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    servers: usize,
    pending_tasks: usize,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let pending_tasks = state.queue.pending_count().await;

    match state.store.server_count() {
        Ok(servers) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                servers,
                pending_tasks,
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                servers: 0,
                pending_tasks,
            }),
        ),
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}
