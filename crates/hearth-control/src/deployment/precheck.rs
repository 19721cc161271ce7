//! Deployment eligibility.

use crate::error::{ControlError, ControlResult};
use crate::types::{ServerRecord, ServerStatus};

/// Decides whether a server may be deployed. Must not have side effects.
pub trait PreCheck: Send + Sync {
    /// Fails with [`ControlError::DeploymentForbidden`] if the server may not be deployed.
    fn check(&self, server: &ServerRecord) -> ControlResult<()>;
}

/// Refuses suspended servers and servers pending deletion.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusPreCheck;

impl PreCheck for StatusPreCheck {
    fn check(&self, server: &ServerRecord) -> ControlResult<()> {
        let reason = match server.status {
            ServerStatus::Active => return Ok(()),
            ServerStatus::Suspended => "server is suspended",
            ServerStatus::PendingDeletion => "server is pending deletion",
        };

        Err(ControlError::DeploymentForbidden {
            server: server.id.clone(),
            reason,
        })
    }
}
