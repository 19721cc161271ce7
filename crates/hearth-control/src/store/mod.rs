//! Storage seams for servers, the ledger and reference data.
//!
//! The orchestration core only depends on these traits. An in-memory
//! implementation backs tests and the single-process service.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::ControlResult;
use crate::types::{
    BillingPeriod, Game, GameId, Resources, ServerId, ServerRecord, ServerStatus, Transaction,
    User, UserId,
};

/// Backend for storing server records.
///
/// Implementations must make `mark_installed` and `claim_deployment` atomic:
/// deferred tasks may run concurrently for the same server and rely on these
/// to decide which invocation acts.
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Insert a new server record.
    ///
    /// Returns an error if a server with the same ID already exists.
    async fn insert(&self, record: &ServerRecord) -> ControlResult<()>;

    /// Get a server by ID.
    ///
    /// Returns `None` if the server does not exist.
    async fn get(&self, id: &ServerId) -> ControlResult<Option<ServerRecord>>;

    /// Store the outcome of a deployment and return the updated record.
    ///
    /// Only the resources, billing period and paid-until time are written;
    /// install and status fields are left as they are.
    async fn record_deployment(
        &self,
        id: &ServerId,
        resources: Resources,
        period: BillingPeriod,
        paid_until: DateTime<Utc>,
    ) -> ControlResult<ServerRecord>;

    /// Set the status of a server.
    async fn set_status(&self, id: &ServerId, status: ServerStatus) -> ControlResult<()>;

    /// Count servers that count against the user's limit.
    async fn count_active_for_user(&self, user_id: &UserId) -> ControlResult<u32>;

    /// Record the install completion time.
    ///
    /// Returns `true` only for the call that made the transition.
    async fn mark_installed(&self, id: &ServerId, at: DateTime<Utc>) -> ControlResult<bool>;

    /// Claim a deployment request for a server.
    ///
    /// Returns `true` if the request was not claimed before.
    async fn claim_deployment(&self, id: &ServerId, request_id: &str) -> ControlResult<bool>;

    /// Release a claim so a redelivered request can try again.
    async fn release_deployment(&self, id: &ServerId, request_id: &str) -> ControlResult<()>;
}

/// Append-only transaction ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Sum of all the user's transactions.
    async fn balance(&self, user_id: &UserId) -> ControlResult<Decimal>;

    /// Append an entry.
    async fn append(&self, transaction: &Transaction) -> ControlResult<()>;

    /// Append a charge of `amount` if the balance covers it.
    ///
    /// The balance check and the append are atomic, so concurrent debits
    /// never take a balance below zero. Fails with
    /// [`ControlError::InsufficientFunds`](crate::error::ControlError::InsufficientFunds)
    /// otherwise.
    async fn debit(
        &self,
        user_id: &UserId,
        amount: Decimal,
        description: &str,
    ) -> ControlResult<()>;

    /// All the user's entries in insertion order.
    async fn transactions(&self, user_id: &UserId) -> ControlResult<Vec<Transaction>>;
}

/// Read-only lookup of users and games.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Get a user by ID.
    async fn user(&self, id: &UserId) -> ControlResult<Option<User>>;

    /// Get a game by ID.
    async fn game(&self, id: &GameId) -> ControlResult<Option<Game>>;
}
