//! Common test utilities for provisioning integration tests.

pub mod fixtures;

use std::sync::Arc;

use hearth_control::config::MonitorConfig;
use hearth_control::types::Transaction;
use hearth_control::{
    ControlConfig, Ledger, MemoryStore, MockPanel, Node, Processed, Provisioning, ServerRecord,
    ServerStore, User,
};
use rust_decimal::Decimal;

use fixtures::{allocations, GameBuilder, UserBuilder};

/// Complete provisioning setup against a mock panel.
pub struct TestControl {
    pub control: Provisioning,
    pub panel: Arc<MockPanel>,
    pub store: Arc<MemoryStore>,
    pub node: Node,
}

impl TestControl {
    /// Creates a setup with default configuration.
    pub fn new() -> Self {
        Self::with_monitor(MonitorConfig::default())
    }

    /// Creates a setup with a custom install polling configuration.
    pub fn with_monitor(monitor: MonitorConfig) -> Self {
        let config = ControlConfig {
            monitor,
            ..ControlConfig::default()
        };

        let panel = Arc::new(MockPanel::new());
        let store = Arc::new(MemoryStore::new());
        let node = fixtures::node();

        panel.add_allocations(node.panel_node_id, allocations(27015..27020));
        store.put_game(GameBuilder::new("mc").build()).unwrap();

        let control = Provisioning::new(&config, Arc::clone(&store), Arc::clone(&panel) as _);

        Self {
            control,
            panel,
            store,
            node,
        }
    }

    /// Registers a user and credits their balance.
    pub async fn user(&self, builder: UserBuilder, balance: Decimal) -> User {
        let user = builder.build();
        self.store.put_user(user.clone()).unwrap();
        self.store
            .append(&Transaction::new(user.id.clone(), balance, "top-up"))
            .await
            .unwrap();
        user
    }

    /// Creates a server for the user using the default game.
    pub async fn create(&self, user: &User) -> ServerRecord {
        let game = GameBuilder::new("mc").build();
        self.control
            .creator
            .create(user, &game, &self.node, &fixtures::form())
            .await
            .unwrap()
    }

    /// Reloads a server record from the store.
    pub async fn reload(&self, record: &ServerRecord) -> ServerRecord {
        self.store.get(&record.id).await.unwrap().expect("server exists")
    }

    /// Runs queued tasks until the queue is empty, returning each result.
    pub async fn drain(&self) -> Vec<Processed> {
        let mut processed = Vec::new();
        while self.control.queue.pending_count().await > 0 {
            let delivery = self.control.queue.next().await;
            processed.push(self.control.worker.process(delivery.task).await);
        }
        processed
    }
}
