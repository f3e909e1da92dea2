//! modbus-fast daemon.
//!
//! Polls one Modbus TCP device at a millisecond cadence and publishes
//! changed bits to Zenoh.

use anyhow::{Context, Result};
use clap::Parser;
use modbus_fast::bridge::{HubFeeds, UpdateBridge};
use modbus_fast::config::ModbusFastConfig;
use modbus_fast::hub::Hub;
use modbus_fast::points::PointMap;
use modbus_fast::status::{BridgeStatus, device_metadata};
use modbus_fast_common::KeyExprBuilder;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};

/// High-rate Modbus TCP poller publishing to Zenoh.
#[derive(Parser, Debug)]
#[command(name = "modbus-fast")]
#[command(about = "Polls a Modbus TCP device and publishes changed bits to Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "modbus-fast.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ModbusFastConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = config.logging.with_level_override(args.log_level.as_deref());
    modbus_fast_common::init_tracing(&log_config).context("Failed to init tracing")?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting modbus-fast");
    info!("Loaded configuration from {:?}", args.config);

    let device = &config.modbus;
    let session = modbus_fast_common::connect(&config.zenoh)
        .await
        .context("Failed to connect to Zenoh")?;
    info!(zid = %session.zid(), "Connected to Zenoh");

    let mut hub = Hub::tcp(device);
    let points = PointMap::new(&device.name, hub.endpoint(), hub.poll_config());
    let keys = KeyExprBuilder::with_prefix(&device.key_prefix, &device.name);
    let status_key = keys.status();
    let metadata = device_metadata(device, &points);

    // Subscribe before starting so the first full refresh is not missed
    let feeds = HubFeeds::from_hub(&hub);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bridge = UpdateBridge::new(session.clone(), keys, points, config.serialization);
    let bridge_task = tokio::spawn(bridge.run(feeds, shutdown_rx));

    hub.start().await.context("Failed to start hub")?;

    BridgeStatus::running()
        .with_metadata(metadata)
        .publish(&session, &status_key)
        .await;

    info!(
        device = %device.name,
        endpoint = %hub.endpoint(),
        register_type = %device.register_type,
        count = device.count,
        period_ms = device.sample_period_ms,
        "modbus-fast running"
    );

    wait_for_shutdown().await?;
    info!("Received shutdown signal");

    shutdown_tx.send_replace(true);
    if let Err(e) = bridge_task.await {
        error!(error = %e, "Bridge task failed");
    }
    hub.stop().await;

    BridgeStatus::offline().publish(&session, &status_key).await;

    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("modbus-fast stopped");

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}
