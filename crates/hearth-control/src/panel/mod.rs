//! Remote provisioning client for the game panel.
//!
//! The panel creates and installs server containers; this crate only drives
//! it through [`ProvisioningClient`] and observes the results.

mod client;
mod mock;

pub use client::PanelClient;
pub use mock::MockPanel;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{PanelConfig, PanelType};
use crate::error::{ControlError, ControlResult};
use crate::types::{Allocation, Node, ServerResource};

/// Resource limits as understood by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Memory in MiB.
    pub memory: u32,
    /// Swap in MiB.
    pub swap: i32,
    /// Disk in MiB.
    pub disk: u32,
    /// Block IO weight.
    pub io: u32,
    /// CPU percent.
    pub cpu: u32,
}

/// Feature limits as understood by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLimits {
    /// Number of databases.
    pub databases: u32,
    /// Number of allocations.
    pub allocations: u32,
    /// Number of backups.
    pub backups: u32,
}

/// Default allocation of a new server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSpec {
    /// Allocation id on the panel.
    pub default: u64,
}

/// Body of a server creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Server name.
    pub name: String,
    /// Owning panel user.
    pub user: u64,
    /// Egg to install.
    pub egg: u64,
    /// Container image.
    pub docker_image: String,
    /// Startup command.
    pub startup: String,
    /// Egg variables.
    pub environment: BTreeMap<String, String>,
    /// Resource limits.
    pub limits: Limits,
    /// Feature limits.
    pub feature_limits: FeatureLimits,
    /// Network allocation.
    pub allocation: AllocationSpec,
    /// Start the server once installed.
    pub start_on_completion: bool,
}

/// Body of a build update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Allocation to keep as default.
    pub allocation: u64,
    /// Resource limits.
    #[serde(flatten)]
    pub limits: Limits,
    /// Feature limits.
    pub feature_limits: FeatureLimits,
}

/// Installation and suspension state reported by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteStatus {
    /// The install script has finished.
    pub installed: bool,
    /// The panel has suspended the server.
    pub suspended: bool,
}

/// Power action sent to a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSignal {
    /// Start the server.
    Start,
    /// Stop the server.
    Stop,
    /// Restart the server.
    Restart,
}

/// Operations the orchestration core needs from the panel.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// Create a server.
    ///
    /// Returns `Ok(None)` when the panel answered without a server resource.
    async fn create_server(&self, spec: &ServerSpec) -> ControlResult<Option<ServerResource>>;

    /// Get the installation state of a server.
    async fn server_status(&self, panel_id: u64) -> ControlResult<RemoteStatus>;

    /// List the unassigned allocations of a node.
    async fn list_allocations(&self, node: &Node) -> ControlResult<Vec<Allocation>>;

    /// Replace the build limits of a server.
    async fn update_build(&self, panel_id: u64, build: &BuildSpec) -> ControlResult<()>;

    /// Send a power signal to a server.
    async fn power(&self, identifier: &str, signal: PowerSignal) -> ControlResult<()>;
}

/// Create a panel client from configuration.
pub fn create_client(config: &PanelConfig) -> ControlResult<Arc<dyn ProvisioningClient>> {
    match config.panel_type {
        PanelType::Http => Ok(Arc::new(PanelClient::new(config)?)),
        PanelType::Mock => Ok(Arc::new(MockPanel::default())),
    }
}

/// Run a panel call, failing with [`ControlError::PanelTimeout`] if it
/// takes longer than `timeout`.
pub async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = ControlResult<T>>,
) -> ControlResult<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| ControlError::PanelTimeout(timeout))?
}
