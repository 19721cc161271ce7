//! Hearth control service binary.
//!
//! Runs the provisioning core with its deferred task worker.

use tracing::info;
use tracing_subscriber::EnvFilter;

use hearth_control::{ControlConfig, ControlService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("hearth_control=info".parse()?),
        )
        .init();

    info!("Hearth control service starting");

    let config = ControlConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        ControlConfig::default()
    });

    info!(
        listen = %config.server.listen,
        panel = %config.panel.url,
        max_attempts = config.monitor.max_attempts,
        "configuration loaded"
    );

    ControlService::new(config).run().await?;

    Ok(())
}
