//! In-memory store for tests and single-process deployments.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::{ControlError, ControlResult};
use crate::types::{
    BillingPeriod, Game, GameId, Resources, ServerId, ServerRecord, ServerStatus, Transaction,
    User, UserId,
};

use super::{Catalog, Ledger, ServerStore};

/// In-memory implementation of every store trait.
///
/// Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    servers: RwLock<HashMap<String, ServerRecord>>,
    claims: RwLock<HashSet<(String, String)>>,
    transactions: RwLock<Vec<Transaction>>,
    users: RwLock<HashMap<String, User>>,
    games: RwLock<HashMap<String, Game>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user.
    pub fn put_user(&self, user: User) -> ControlResult<()> {
        let mut users = self
            .users
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        users.insert(user.id.as_str().to_owned(), user);
        Ok(())
    }

    /// Add or replace a game.
    pub fn put_game(&self, game: Game) -> ControlResult<()> {
        let mut games = self
            .games
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        games.insert(game.id.as_str().to_owned(), game);
        Ok(())
    }

    /// Number of server records held.
    pub fn server_count(&self) -> ControlResult<usize> {
        let servers = self
            .servers
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(servers.len())
    }
}

#[async_trait]
impl ServerStore for MemoryStore {
    async fn insert(&self, record: &ServerRecord) -> ControlResult<()> {
        let mut servers = self
            .servers
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let key = record.id.as_str().to_owned();
        if servers.contains_key(&key) {
            return Err(ControlError::internal(format!("server {key} already exists")));
        }

        servers.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, id: &ServerId) -> ControlResult<Option<ServerRecord>> {
        let servers = self
            .servers
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(servers.get(id.as_str()).cloned())
    }

    async fn record_deployment(
        &self,
        id: &ServerId,
        resources: Resources,
        period: BillingPeriod,
        paid_until: DateTime<Utc>,
    ) -> ControlResult<ServerRecord> {
        let mut servers = self
            .servers
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let record = servers
            .get_mut(id.as_str())
            .ok_or_else(|| ControlError::ServerNotFound(id.to_string()))?;

        record.resources = resources;
        record.billing_period = period;
        record.paid_until = Some(paid_until);
        record.updated_at = Utc::now();

        Ok(record.clone())
    }

    async fn set_status(&self, id: &ServerId, status: ServerStatus) -> ControlResult<()> {
        let mut servers = self
            .servers
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let record = servers
            .get_mut(id.as_str())
            .ok_or_else(|| ControlError::ServerNotFound(id.to_string()))?;

        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn count_active_for_user(&self, user_id: &UserId) -> ControlResult<u32> {
        let servers = self
            .servers
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let count = servers
            .values()
            .filter(|s| &s.user_id == user_id && s.status.counts_against_limit())
            .count();

        u32::try_from(count).map_err(|_| ControlError::internal("server count overflow"))
    }

    async fn mark_installed(&self, id: &ServerId, at: DateTime<Utc>) -> ControlResult<bool> {
        let mut servers = self
            .servers
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let record = servers
            .get_mut(id.as_str())
            .ok_or_else(|| ControlError::ServerNotFound(id.to_string()))?;

        if record.installed_at.is_some() {
            return Ok(false);
        }

        record.installed_at = Some(at);
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn claim_deployment(&self, id: &ServerId, request_id: &str) -> ControlResult<bool> {
        let mut claims = self
            .claims
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(claims.insert((id.as_str().to_owned(), request_id.to_owned())))
    }

    async fn release_deployment(&self, id: &ServerId, request_id: &str) -> ControlResult<()> {
        let mut claims = self
            .claims
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        claims.remove(&(id.as_str().to_owned(), request_id.to_owned()));
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryStore {
    async fn balance(&self, user_id: &UserId) -> ControlResult<Decimal> {
        let transactions = self
            .transactions
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(transactions
            .iter()
            .filter(|t| &t.user_id == user_id)
            .map(|t| t.amount)
            .sum())
    }

    async fn append(&self, transaction: &Transaction) -> ControlResult<()> {
        let mut transactions = self
            .transactions
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        transactions.push(transaction.clone());
        Ok(())
    }

    async fn debit(
        &self,
        user_id: &UserId,
        amount: Decimal,
        description: &str,
    ) -> ControlResult<()> {
        let mut transactions = self
            .transactions
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let available: Decimal = transactions
            .iter()
            .filter(|t| &t.user_id == user_id)
            .map(|t| t.amount)
            .sum();
        if amount > available {
            return Err(ControlError::InsufficientFunds {
                required: amount,
                available,
            });
        }

        transactions.push(Transaction::charge(user_id.clone(), amount, description));
        Ok(())
    }

    async fn transactions(&self, user_id: &UserId) -> ControlResult<Vec<Transaction>> {
        let transactions = self
            .transactions
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(transactions
            .iter()
            .filter(|t| &t.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn user(&self, id: &UserId) -> ControlResult<Option<User>> {
        let users = self
            .users
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(users.get(id.as_str()).cloned())
    }

    async fn game(&self, id: &GameId) -> ControlResult<Option<Game>> {
        let games = self
            .games
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(games.get(id.as_str()).cloned())
    }
}
