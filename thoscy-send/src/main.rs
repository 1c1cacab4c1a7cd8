//! OSC -> ThingsBoard MQTT relay server.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use thoscy_bridge_framework::{BridgeConfig, BridgeRunner};
use thoscy_send::config::{SendArgs, SendConfig};
use thoscy_send::listener::OscListener;
use thoscy_send::publisher::Publisher;
use thoscy_send::relay::{SendRelay, run_relay};

#[tokio::main]
async fn main() -> Result<()> {
    let args = SendArgs::parse();

    // File, then environment, then command line
    let mut config = SendConfig::load_or_default(args.bridge.config.as_deref())?;
    config.apply_env(|name| std::env::var(name).ok());
    config.apply_args(&args);
    config.validate()?;

    let mut runner = BridgeRunner::new_with_args("thoscy-send", config, Some(&args.bridge))?;
    let config = runner.config().clone();

    let devices = config.device_map();
    tracing::debug!(
        host = %config.base.thingsboard.host,
        names = ?devices.names(),
        address = %config.send.address,
        port = config.send.port,
        mqtt_port = config.send.mqtt_port,
        "Configuration"
    );

    let mut publisher = Publisher::new(config.publisher_settings(), devices.clone());
    publisher
        .connect()
        .await
        .with_context(|| format!("could not connect to {}", config.base.thingsboard.host))?;

    let listener = OscListener::bind(&config.listen_address())
        .await
        .with_context(|| format!("could not bind {}", config.listen_address()))?;

    let (tx, rx) = mpsc::channel(1000);

    let shutdown = runner.shutdown_signal();
    runner.spawn(listener.run(tx, shutdown));

    let shutdown = runner.shutdown_signal();
    runner.spawn(run_relay(SendRelay::new(devices), publisher, rx, shutdown));

    tracing::info!(
        "osc {} -> mqtt {}",
        config.listen_address(),
        config.base.thingsboard.host
    );

    runner.run().await?;
    Ok(())
}
