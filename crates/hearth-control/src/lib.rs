//! Hearth Control
//!
//! This crate provides the provisioning core for game servers hosted on a
//! Pterodactyl-style panel. It enforces billing rules before any remote side
//! effect, creates servers on the panel, watches their installation and
//! deploys them once they are ready.
//!
//! # Architecture
//!
//! - **Creation**: [`ServerCreator`] checks the user's server limit and
//!   balance, reserves an allocation, creates the server remotely and queues
//!   an install monitor.
//! - **Installation**: [`InstallMonitor`] polls the panel from a deferred
//!   task, rescheduling itself with backoff until the server is installed or
//!   the attempts run out.
//! - **Deployment**: [`AutoDeployment`] deploys an installed server right
//!   away and defers to a queued task otherwise.
//! - **Deferred work**: [`MemoryTaskQueue`] delivers tasks at least once and
//!   [`TaskWorker`] runs them.
//!
//! # Build State
//!
//! A server only becomes a record once the panel has assigned identifiers,
//! enforced at compile time using the typestate pattern:
//!
//! ```text
//! Draft ──▶ Provisioned ──▶ ServerRecord
//! ```

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod allocation;
pub mod billing;
pub mod config;
pub mod creation;
pub mod deploy_config;
pub mod deployment;
pub mod error;
pub mod monitor;
pub mod panel;
pub mod queue;
pub mod service;
pub mod state;
pub mod store;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-export commonly used types at the crate root
pub use allocation::{AllocationClaim, AllocationSelector, PanelAllocationSelector};
pub use billing::{CostEvaluator, LimitGuard, RateCostEvaluator, StoreLimitGuard};
pub use config::ControlConfig;
pub use creation::{CreatorParts, ServerCreator};
pub use deploy_config::{DeployConfigBuilder, PanelSpecBuilder};
pub use deployment::{
    AutoDeployOutcome, AutoDeployment, DeferredDeployment, InstallStateQuery, PanelDeployer,
    PanelInstallState, PreCheck, ServerDeployer, StatusPreCheck,
};
pub use error::{ControlError, ControlResult};
pub use monitor::{InstallMonitor, MonitorOutcome};
pub use panel::{MockPanel, PanelClient, ProvisioningClient};
pub use queue::{MemoryTaskQueue, Task, TaskHandle, TaskQueue};
pub use service::{ControlService, Provisioning};
pub use state::{Draft, Provisioned, ServerBuild};
pub use store::{Catalog, Ledger, MemoryStore, ServerStore};
pub use types::{
    BillingPeriod, DeployOptions, Game, GameId, Node, NodeId, Resources, ServerForm, ServerId,
    ServerRecord, ServerStatus, User, UserId,
};
pub use worker::{Processed, TaskWorker};
