//! Error types for hearth-control.

use std::time::Duration;

use rust_decimal::Decimal;

use crate::types::{NodeId, ServerId};

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur while provisioning or deploying servers.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The user already owns as many servers as their limit allows.
    #[error("server limit reached: user may own at most {limit} server(s)")]
    TooManyServers {
        /// The user's configured server limit.
        limit: u32,
    },

    /// The user's balance does not cover the requested period.
    #[error("insufficient funds: {required} required, {available} available")]
    InsufficientFunds {
        /// Cost of the requested period.
        required: Decimal,
        /// Balance at the time of the check.
        available: Decimal,
    },

    /// No free allocation on the node matches the game.
    #[error("no free allocation on node {node}")]
    AllocationExhausted {
        /// Node that was searched.
        node: NodeId,
    },

    /// The panel did not return a server resource.
    #[error("provisioning failed: {0}")]
    ProvisioningFailed(String),

    /// The server is in a state that forbids deployment.
    #[error("deployment forbidden for server {server}: {reason}")]
    DeploymentForbidden {
        /// Server the deployment was requested for.
        server: ServerId,
        /// Why it was refused.
        reason: &'static str,
    },

    /// The panel never reported the server as installed.
    #[error("server {server} not installed after {attempts} attempt(s)")]
    InstallTimeout {
        /// Server being watched.
        server: ServerId,
        /// Number of polls made.
        attempts: u32,
    },

    /// Panel API returned an error response.
    #[error("panel error: {0}")]
    Panel(String),

    /// Panel API call did not finish in time.
    #[error("panel call timed out after {0:?}")]
    PanelTimeout(Duration),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server not found.
    #[error("server not found: {0}")]
    ServerNotFound(String),

    /// User not found.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Game not found.
    #[error("game not found: {0}")]
    GameNotFound(String),

    /// Node not found.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// The deferred task queue is full.
    #[error("task queue is full")]
    QueueFull,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a panel error.
    #[must_use]
    pub fn panel(msg: impl Into<String>) -> Self {
        Self::Panel(msg.into())
    }

    /// Create a provisioning failure.
    #[must_use]
    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::ProvisioningFailed(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if retrying the same operation later may succeed.
    ///
    /// Billing and state refusals are permanent: the same input fails the
    /// same way until an operator or the user changes something.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Panel(_)
                | Self::PanelTimeout(_)
                | Self::Http(_)
                | Self::QueueFull
                | Self::Internal(_)
        )
    }
}
