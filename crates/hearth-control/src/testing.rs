//! Fixtures shared by unit tests.

use std::collections::BTreeMap;
use std::ops::Range;

use chrono::Utc;
use rust_decimal_macros::dec;

use crate::types::{
    Allocation, BillingPeriod, Game, GameId, Node, NodeId, ResourceRates, Resources, ServerForm,
    ServerId, ServerRecord, ServerStatus, User, UserId,
};

pub fn user(server_limit: u32) -> User {
    User {
        id: UserId::new("user-1"),
        username: "alice".to_owned(),
        panel_user_id: 42,
        server_limit,
    }
}

pub fn game(rates: ResourceRates) -> Game {
    Game {
        id: GameId::new("mc"),
        name: "Minecraft".to_owned(),
        nest_id: 1,
        egg_id: 5,
        docker_image: "ghcr.io/pterodactyl/yolks:java_17".to_owned(),
        startup: "java -jar server.jar".to_owned(),
        environment: BTreeMap::new(),
        port_range: None,
        rates,
    }
}

/// One core costs 100 per day, nothing else is billed.
pub fn priced_game() -> Game {
    game(ResourceRates {
        cpu: dec!(100),
        ..ResourceRates::default()
    })
}

pub fn node() -> Node {
    Node {
        id: NodeId::new("node-1"),
        name: "fra-1".to_owned(),
        panel_node_id: 3,
    }
}

pub fn allocations(ports: Range<u16>) -> Vec<Allocation> {
    ports
        .map(|port| Allocation {
            id: u64::from(port),
            ip: "10.0.0.1".to_owned(),
            port,
        })
        .collect()
}

pub const fn resources() -> Resources {
    Resources {
        cpu: 100,
        memory: 512,
        disk: 2000,
        databases: 0,
    }
}

pub const fn form(billing_period: BillingPeriod) -> ServerForm {
    ServerForm {
        billing_period,
        resources: resources(),
    }
}

/// Server 512/"random_hash" on port 25565.
pub fn record(status: ServerStatus) -> ServerRecord {
    let now = Utc::now();
    ServerRecord {
        id: ServerId::generate(),
        user_id: UserId::new("user-1"),
        game_id: GameId::new("mc"),
        node_id: NodeId::new("node-1"),
        name: "minecraft-alice".to_owned(),
        resources: resources(),
        billing_period: BillingPeriod::Daily,
        allocation: Allocation {
            id: 25565,
            ip: "10.0.0.1".to_owned(),
            port: 25565,
        },
        panel_id: 512,
        panel_hash: "random_hash".to_owned(),
        status,
        installed_at: None,
        paid_until: None,
        created_at: now,
        updated_at: now,
    }
}
