//! carto - robot controller daemon
//!
//! Listens for the operator console, executes its commands and reports the
//! robot's position and the obstacles it meets.

use carto_link::Endpoint;
use carto_robot::{Config, GridSensor, LoggingDrive, Pilot};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if CARTO_CONFIG is set, then env overrides)
    let config_path = std::env::var("CARTO_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::from_env()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Configuration error: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting carto robot controller");
    tracing::info!("  Role: {}", config.link.role);
    tracing::info!("  Address: {}", config.link.addr);
    tracing::info!("  Queue capacity: {}", config.link.queue_capacity());
    tracing::info!(
        "  Grid: {}x{} ({} obstacle(s))",
        config.pilot.width,
        config.pilot.height,
        config.pilot.obstacles.len()
    );
    tracing::info!("  Start pose: {}", config.pilot.start);

    let mut endpoint = Endpoint::new(config.link.clone());

    let pilot = Pilot::new(
        &config.pilot,
        LoggingDrive::new(),
        GridSensor::from_config(&config.pilot),
    );
    let pilot_task = pilot.install(&endpoint, config.pilot.inbox_capacity);

    if let Err(e) = endpoint.start().await {
        tracing::error!("Failed to start link: {}", e);
        pilot_task.abort();
        return Err(e.into());
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping...");

    endpoint.stop().await;
    pilot_task.abort();

    tracing::info!("Robot controller stopped");
    Ok(())
}
