//! Typestate for a server under construction.
//!
//! A local [`ServerRecord`] can only be produced from a build that has been
//! provisioned on the panel, so a record without remote identifiers cannot
//! exist.
//!
//! ```text
//! Draft ──provisioned(resource)──▶ Provisioned ──into_record()──▶ ServerRecord
//! ```

use chrono::Utc;

use crate::types::{
    Allocation, BillingPeriod, GameId, NodeId, Resources, ServerId, ServerRecord, ServerResource,
    ServerStatus, UserId,
};

/// Marker trait for build states.
pub trait BuildState: private::Sealed + Send + Sync {
    /// Get the state name for logging.
    fn name() -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// Validated locally, not yet created on the panel.
#[derive(Debug, Clone, Copy)]
pub struct Draft;

/// Created on the panel; remote identifiers are known.
#[derive(Debug, Clone)]
pub struct Provisioned {
    resource: ServerResource,
}

impl private::Sealed for Draft {}
impl private::Sealed for Provisioned {}

impl BuildState for Draft {
    fn name() -> &'static str {
        "draft"
    }
}

impl BuildState for Provisioned {
    fn name() -> &'static str {
        "provisioned"
    }
}

/// Data known about a server before the panel creates it.
#[derive(Debug, Clone)]
pub struct ServerDraft {
    /// Identifier the local record will use.
    pub id: ServerId,
    /// Owner.
    pub user_id: UserId,
    /// Game to install.
    pub game_id: GameId,
    /// Target node.
    pub node_id: NodeId,
    /// Server name.
    pub name: String,
    /// Requested resources.
    pub resources: Resources,
    /// Requested billing period.
    pub billing_period: BillingPeriod,
    /// Claimed allocation.
    pub allocation: Allocation,
}

/// A server build in a specific state.
#[derive(Debug)]
pub struct ServerBuild<S: BuildState> {
    draft: ServerDraft,
    state: S,
}

impl<S: BuildState> ServerBuild<S> {
    /// Get the draft data.
    #[must_use]
    pub const fn draft(&self) -> &ServerDraft {
        &self.draft
    }

    /// Get the server ID.
    #[must_use]
    pub const fn id(&self) -> &ServerId {
        &self.draft.id
    }

    /// Get the state name.
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        S::name()
    }
}

impl ServerBuild<Draft> {
    /// Start a build from draft data.
    #[must_use]
    pub const fn new(draft: ServerDraft) -> Self {
        Self { draft, state: Draft }
    }

    /// Attach the identifiers returned by the panel.
    #[must_use]
    pub fn provisioned(self, resource: ServerResource) -> ServerBuild<Provisioned> {
        ServerBuild {
            draft: self.draft,
            state: Provisioned { resource },
        }
    }
}

impl ServerBuild<Provisioned> {
    /// Panel identifiers of the created server.
    #[must_use]
    pub const fn resource(&self) -> &ServerResource {
        &self.state.resource
    }

    /// Produce the record to persist.
    #[must_use]
    pub fn into_record(self) -> ServerRecord {
        let now = Utc::now();
        let resource = self.state.resource;

        ServerRecord {
            id: self.draft.id,
            user_id: self.draft.user_id,
            game_id: self.draft.game_id,
            node_id: self.draft.node_id,
            name: self.draft.name,
            resources: self.draft.resources,
            billing_period: self.draft.billing_period,
            allocation: self.draft.allocation,
            panel_id: resource.id,
            panel_hash: resource.identifier,
            status: ServerStatus::Active,
            installed_at: None,
            paid_until: None,
            created_at: now,
            updated_at: now,
        }
    }
}
