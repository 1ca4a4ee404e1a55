//! The `eltako-bridge` daemon connects an `MQTT` command bus to a
//! fleet of Eltako Series 64 shading actors.
//!
//! Commands arriving on `{base}/{name}/set` are normalized and applied
//! to the matching actor; polled position changes are published back
//! to `{base}/{name}`. Actors are started from the configuration file
//! and, for devices configured with a serial number only, from
//! `mDNS-SD` discovery.

use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::mpsc;

use tracing::{error, info};

use tracing_subscriber::EnvFilter;

use eltako::config::Config;
use eltako::error::Result;
use eltako::registry::ActorRegistry;

use crate::bridge::Bridge;

mod bridge;
mod mqtt;

// The capacity of the position update channel between the polling
// tasks and the publisher.
const UPDATE_CHANNEL_CAPACITY: usize = 10;

async fn run(config: Config) -> Result<()> {
    let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
    let registry = Arc::new(ActorRegistry::new());

    let (client, eventloop) = mqtt::connect(&config.mqtt);
    let base_topic = config.mqtt.topic.clone();

    let bridge = Arc::new(Bridge::new(
        config,
        Arc::clone(&registry),
        updates_tx,
    ));

    bridge.start_discovery()?;
    bridge.start_actors().await?;

    drop(tokio::spawn(mqtt::run_command_router(
        client.clone(),
        eventloop,
        registry,
        base_topic.clone(),
    )));
    drop(tokio::spawn(mqtt::run_position_publisher(
        client,
        updates_rx,
        base_topic,
    )));

    info!("Application is now ready. Press Ctrl+C to quit.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for the quit signal: {e}");
    }
    info!("Received quit signal");

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let Some(config_path) = std::env::args().nth(1) else {
        eprintln!("Usage: eltako-bridge <config.json>");
        return ExitCode::FAILURE;
    };

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed loading config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Config file {config_path}");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
