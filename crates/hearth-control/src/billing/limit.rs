//! Per-user server limit.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ControlError, ControlResult};
use crate::store::ServerStore;
use crate::types::User;

/// Refuses new servers once a user owns as many as allowed.
#[async_trait]
pub trait LimitGuard: Send + Sync {
    /// Fails with [`ControlError::TooManyServers`] if the user is at their limit.
    async fn check(&self, user: &User) -> ControlResult<()>;
}

/// Limit guard counting the user's servers in the store.
pub struct StoreLimitGuard {
    store: Arc<dyn ServerStore>,
}

impl StoreLimitGuard {
    /// Create a guard over the given store.
    pub fn new(store: Arc<dyn ServerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LimitGuard for StoreLimitGuard {
    async fn check(&self, user: &User) -> ControlResult<()> {
        let active = self.store.count_active_for_user(&user.id).await?;
        debug!(user_id = %user.id, active, limit = user.server_limit, "checking server limit");

        if active >= user.server_limit {
            return Err(ControlError::TooManyServers {
                limit: user.server_limit,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for StoreLimitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLimitGuard").finish_non_exhaustive()
    }
}
