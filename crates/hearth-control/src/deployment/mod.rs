//! Deployment of existing servers.
//!
//! A deployment charges a billing period and pushes the server's build to
//! the panel. [`AutoDeployment`] deploys right away when the server is
//! installed and defers to a queued task otherwise; [`DeferredDeployment`]
//! runs that task.

mod auto;
mod deferred;
mod deployer;
mod precheck;

pub use auto::{AutoDeployOutcome, AutoDeployment, InstallStateQuery, PanelInstallState};
pub use deferred::{DeferredDeployment, DeferredOutcome, DeployRequest};
pub use deployer::{PanelDeployer, ServerDeployer};
pub use precheck::{PreCheck, StatusPreCheck};
