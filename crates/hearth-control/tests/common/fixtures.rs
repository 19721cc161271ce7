//! Test fixtures for provisioning integration tests.

use std::collections::BTreeMap;
use std::ops::Range;

use hearth_control::types::{Allocation, ResourceRates};
use hearth_control::{BillingPeriod, Game, GameId, Node, NodeId, Resources, ServerForm, User, UserId};
use rust_decimal_macros::dec;

/// Builder for creating test User instances.
pub struct UserBuilder {
    id: String,
    username: String,
    panel_user_id: u64,
    server_limit: u32,
}

impl UserBuilder {
    /// Creates a new user builder with the given ID.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            username: "alice".to_string(),
            panel_user_id: 42,
            server_limit: 5,
        }
    }

    /// Sets the username used in server names.
    pub fn with_username(mut self, username: &str) -> Self {
        self.username = username.to_string();
        self
    }

    /// Sets how many servers the user may own.
    pub fn with_server_limit(mut self, limit: u32) -> Self {
        self.server_limit = limit;
        self
    }

    /// Builds the User.
    pub fn build(self) -> User {
        User {
            id: UserId::new(self.id),
            username: self.username,
            panel_user_id: self.panel_user_id,
            server_limit: self.server_limit,
        }
    }
}

/// Builder for creating test Game instances.
///
/// Defaults to one core costing 100 per day.
pub struct GameBuilder {
    id: String,
    name: String,
    rates: ResourceRates,
}

impl GameBuilder {
    /// Creates a new game builder with the given ID.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: "Minecraft".to_string(),
            rates: ResourceRates {
                cpu: dec!(100),
                ..ResourceRates::default()
            },
        }
    }

    /// Sets the daily resource rates.
    pub fn with_rates(mut self, rates: ResourceRates) -> Self {
        self.rates = rates;
        self
    }

    /// Builds the Game.
    pub fn build(self) -> Game {
        Game {
            id: GameId::new(self.id),
            name: self.name,
            nest_id: 1,
            egg_id: 5,
            docker_image: "ghcr.io/pterodactyl/yolks:java_17".to_string(),
            startup: "java -jar server.jar".to_string(),
            environment: BTreeMap::new(),
            port_range: None,
            rates: self.rates,
        }
    }
}

/// The node all tests provision on.
pub fn node() -> Node {
    Node {
        id: NodeId::new("node-1"),
        name: "fra-1".to_string(),
        panel_node_id: 3,
    }
}

/// Free allocations on one IP, using the port as ID.
pub fn allocations(ports: Range<u16>) -> Vec<Allocation> {
    ports
        .map(|port| Allocation {
            id: u64::from(port),
            ip: "10.0.0.1".to_string(),
            port,
        })
        .collect()
}

/// One core, 512 MiB of memory, billed daily.
pub fn form() -> ServerForm {
    ServerForm {
        billing_period: BillingPeriod::Daily,
        resources: Resources {
            cpu: 100,
            memory: 512,
            disk: 2000,
            databases: 0,
        },
    }
}
