//! Core types for hearth-control.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an ID from an existing value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Unique identifier for a user.
    UserId
);
string_id!(
    /// Unique identifier for a game definition.
    GameId
);
string_id!(
    /// Unique identifier for a node.
    NodeId
);
string_id!(
    /// Unique identifier for a locally recorded server.
    ServerId
);

impl ServerId {
    /// Generate a new unique server ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }
}

/// How often a server is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    /// Billed every hour.
    Hourly,
    /// Billed every day.
    #[default]
    Daily,
    /// Billed every seven days.
    Weekly,
    /// Billed every thirty days.
    Monthly,
}

impl BillingPeriod {
    /// Get the period name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Length of the period in days.
    #[must_use]
    pub fn days(&self) -> Decimal {
        match self {
            Self::Hourly => Decimal::ONE / dec!(24),
            Self::Daily => Decimal::ONE,
            Self::Weekly => dec!(7),
            Self::Monthly => dec!(30),
        }
    }

    /// Length of the period as a wall-clock duration.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        match self {
            Self::Hourly => chrono::Duration::hours(1),
            Self::Daily => chrono::Duration::days(1),
            Self::Weekly => chrono::Duration::days(7),
            Self::Monthly => chrono::Duration::days(30),
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BillingPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(format!("unknown billing period: {s}")),
        }
    }
}

/// Resource quantities requested for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resources {
    /// CPU limit in percent of one core (100 = one core).
    pub cpu: u32,
    /// Memory limit in MiB.
    pub memory: u32,
    /// Disk limit in MiB.
    pub disk: u32,
    /// Number of databases.
    #[serde(default)]
    pub databases: u32,
}

/// Form input submitted when requesting a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerForm {
    /// Billing period to charge for.
    pub billing_period: BillingPeriod,
    /// Requested resources.
    #[serde(flatten)]
    pub resources: Resources,
}

/// Daily price of each billable resource unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceRates {
    /// Price per 100% CPU per day.
    pub cpu: Decimal,
    /// Price per MiB of memory per day.
    pub memory: Decimal,
    /// Price per MiB of disk per day.
    pub disk: Decimal,
    /// Price per database per day.
    pub database: Decimal,
}

/// Inclusive port range a game is allowed to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First allowed port.
    pub start: u16,
    /// Last allowed port.
    pub end: u16,
}

impl PortRange {
    /// Returns true if the port falls within the range.
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

/// A customer account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Local identifier.
    pub id: UserId,
    /// Display name.
    pub username: String,
    /// Matching user on the panel, owner of created servers.
    pub panel_user_id: u64,
    /// Maximum number of servers the user may own at once.
    pub server_limit: u32,
}

/// A provisionable game product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    /// Local identifier.
    pub id: GameId,
    /// Product name.
    pub name: String,
    /// Panel nest containing the egg.
    pub nest_id: u64,
    /// Panel egg used to install the server.
    pub egg_id: u64,
    /// Container image to run.
    pub docker_image: String,
    /// Startup command template.
    pub startup: String,
    /// Egg environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Ports the game may listen on, any port if absent.
    #[serde(default)]
    pub port_range: Option<PortRange>,
    /// Daily resource prices.
    pub rates: ResourceRates,
}

/// A host on the panel that exposes allocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Local identifier.
    pub id: NodeId,
    /// Node name.
    pub name: String,
    /// Node identifier on the panel.
    pub panel_node_id: u64,
}

/// A network address on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Allocation {
    /// Allocation identifier on the panel.
    pub id: u64,
    /// IP address.
    pub ip: String,
    /// Port.
    pub port: u16,
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Identifiers the panel assigns to a newly created server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResource {
    /// Numeric server id.
    pub id: u64,
    /// Short identifier (hash) used by the client API.
    pub identifier: String,
}

/// Local lifecycle status of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Running normally.
    #[default]
    Active,
    /// Suspended by an operator or for non-payment.
    Suspended,
    /// Scheduled for removal.
    PendingDeletion,
}

impl ServerStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::PendingDeletion => "pending_deletion",
        }
    }

    /// Returns true if the server counts against the owner's limit.
    #[must_use]
    pub const fn counts_against_limit(&self) -> bool {
        !matches!(self, Self::PendingDeletion)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A server as recorded locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Local identifier.
    pub id: ServerId,
    /// Owner.
    pub user_id: UserId,
    /// Game the server runs.
    pub game_id: GameId,
    /// Node hosting the server.
    pub node_id: NodeId,
    /// Server name as sent to the panel.
    pub name: String,
    /// Current resource limits.
    pub resources: Resources,
    /// Current billing period.
    pub billing_period: BillingPeriod,
    /// Address bound to the server.
    pub allocation: Allocation,
    /// Server id on the panel.
    pub panel_id: u64,
    /// Server identifier (hash) on the panel.
    pub panel_hash: String,
    /// Lifecycle status.
    pub status: ServerStatus,
    /// When the install monitor first saw the server installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
    /// End of the last paid period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_until: Option<DateTime<Utc>>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// An append-only ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Entry identifier.
    pub id: String,
    /// User whose balance the entry affects.
    pub user_id: UserId,
    /// Signed amount; charges are negative.
    pub amount: Decimal,
    /// Human readable reason.
    pub description: String,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a ledger entry for the given user.
    #[must_use]
    pub fn new(user_id: UserId, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            user_id,
            amount,
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    /// Create a charge; the amount is stored negated.
    #[must_use]
    pub fn charge(user_id: UserId, cost: Decimal, description: impl Into<String>) -> Self {
        Self::new(user_id, -cost, description)
    }
}

/// Extra instructions for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeployOptions {
    /// New resource limits to apply, keeping the current ones if absent.
    #[serde(default)]
    pub resources: Option<Resources>,
    /// Power the server on once deployed.
    #[serde(default)]
    pub start: bool,
}
