//! Configuration for hearth-control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Panel client configuration.
    #[serde(default)]
    pub panel: PanelConfig,

    /// Install polling behaviour.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Deferred task queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `control.toml` in the current directory (if present)
    /// 3. Environment variables with `HEARTH_CONTROL_` prefix
    pub fn load() -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file("control.toml"))
            .merge(Env::prefixed("HEARTH_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("HEARTH_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address for the health endpoints.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8090)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Type of panel client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelType {
    /// HTTP client for the panel API.
    #[default]
    Http,

    /// In-memory panel for testing.
    Mock,
}

/// Panel client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    /// Which client to use.
    #[serde(default)]
    pub panel_type: PanelType,

    /// Base URL of the panel.
    #[serde(default = "default_panel_url")]
    pub url: String,

    /// Application API key.
    pub api_key: Option<String>,

    /// Client API key, used for power actions.
    pub client_api_key: Option<String>,

    /// Timeout applied to every panel call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_panel_url() -> String {
    "http://localhost:8080".to_owned()
}

const fn default_request_timeout_secs() -> u64 {
    10
}

impl PanelConfig {
    /// Timeout applied to every panel call.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            panel_type: PanelType::default(),
            url: default_panel_url(),
            api_key: None,
            client_api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// How the delay between polls grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every poll.
    Fixed,
    /// Delay doubles after every poll, capped at the maximum.
    #[default]
    Exponential,
}

/// Install polling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Backoff policy.
    #[serde(default)]
    pub backoff: Backoff,

    /// Delay before the first retry, in seconds.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    /// Upper bound on any single delay, in seconds.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Polls made before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

const fn default_base_delay_secs() -> u64 {
    15
}

const fn default_max_delay_secs() -> u64 {
    300
}

const fn default_max_attempts() -> u32 {
    20
}

impl MonitorConfig {
    /// Delay to wait after the given zero-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = Duration::from_secs(self.base_delay_secs);
        let max = Duration::from_secs(self.max_delay_secs);

        let delay = match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.min(16));
                base.saturating_mul(factor)
            }
        };

        delay.min(max)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Deferred task queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of pending tasks.
    #[serde(default = "default_max_queue_size")]
    pub max_size: usize,
}

const fn default_max_queue_size() -> usize {
    10_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_queue_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControlConfig::default();
        assert_eq!(config.server.listen.port(), 8090);
        assert_eq!(config.panel.panel_type, PanelType::Http);
        assert_eq!(config.panel.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.monitor.backoff, Backoff::Exponential);
        assert_eq!(config.monitor.max_attempts, 20);
        assert_eq!(config.queue.max_size, 10_000);
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:9000"

            [panel]
            panel_type = "mock"
            url = "https://panel.example.com"
            api_key = "ptla_secret"
            request_timeout_secs = 3

            [monitor]
            backoff = "fixed"
            base_delay_secs = 5
            max_attempts = 4
        "#;

        let config: ControlConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen.port(), 9000);
        assert_eq!(config.panel.panel_type, PanelType::Mock);
        assert_eq!(config.panel.url, "https://panel.example.com");
        assert_eq!(config.panel.api_key.as_deref(), Some("ptla_secret"));
        assert_eq!(config.panel.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.monitor.backoff, Backoff::Fixed);
        assert_eq!(config.monitor.max_attempts, 4);
        assert_eq!(config.monitor.max_delay_secs, 300);
    }

    #[test]
    fn fixed_backoff_never_grows() {
        let config = MonitorConfig {
            backoff: Backoff::Fixed,
            base_delay_secs: 10,
            ..MonitorConfig::default()
        };
        assert_eq!(config.delay_for(0), Duration::from_secs(10));
        assert_eq!(config.delay_for(7), Duration::from_secs(10));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let config = MonitorConfig {
            backoff: Backoff::Exponential,
            base_delay_secs: 15,
            max_delay_secs: 100,
            max_attempts: 10,
        };
        assert_eq!(config.delay_for(0), Duration::from_secs(15));
        assert_eq!(config.delay_for(1), Duration::from_secs(30));
        assert_eq!(config.delay_for(2), Duration::from_secs(60));
        assert_eq!(config.delay_for(3), Duration::from_secs(100));
        assert_eq!(config.delay_for(u32::MAX), Duration::from_secs(100));
    }
}
