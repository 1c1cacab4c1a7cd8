//! OSC <- ThingsBoard websocket relay server.

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;

use thoscy_bridge_framework::{BridgeConfig, BridgeRunner};
use thoscy_recv::config::{RecvArgs, RecvConfig};
use thoscy_recv::receiver::ConnectionManager;
use thoscy_recv::relay::{OscSender, RecvRelay, RelayOptions, run_relay};
use thoscy_recv::transport::ThingsBoardTransport;

#[tokio::main]
async fn main() -> Result<()> {
    let args = RecvArgs::parse();

    // File, then environment, then command line
    let mut config = RecvConfig::load_or_default(args.bridge.config.as_deref())?;
    config.apply_env(|name| std::env::var(name).ok());
    config.apply_args(&args);
    config.validate()?;

    let mut runner = BridgeRunner::new_with_args("thoscy-recv", config, Some(&args.bridge))?;
    let config = runner.config().clone();

    let device_ids = config.device_ids();
    let options = RelayOptions {
        telemetry: config.recv.telemetry,
        prefix: config.prefix_active(),
    };
    tracing::debug!(
        host = %config.base.thingsboard.host,
        user = %config.recv.user,
        ids = ?device_ids,
        address = %config.recv.address,
        port = config.recv.port,
        telemetry = options.telemetry,
        prefix = options.prefix,
        "Configuration"
    );

    let transport = ThingsBoardTransport::new(
        config.base.thingsboard.http_base(),
        config.base.thingsboard.ws_base(),
        config.credentials(),
    )?;
    let sender = OscSender::bind(config.osc_target()).await?;

    let (tx, rx) = mpsc::channel(1000);
    let manager = ConnectionManager::new(transport, device_ids, config.receiver_settings(), tx);

    let shutdown = runner.shutdown_signal();
    runner.spawn(async move { manager.run(shutdown).await });

    let shutdown = runner.shutdown_signal();
    runner.spawn(run_relay(RecvRelay::new(options), rx, sender, shutdown));

    tracing::info!(
        "osc {} <- ws {}",
        config.osc_target(),
        config.base.thingsboard.host
    );

    runner.run().await?;
    Ok(())
}
