//! `relay` binary: load config, start the server, drain on Ctrl-C.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use relay_server::{shutdown_signal, Overrides, RelayConfig, RelayServer};

/// Real-time notification relay.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Cli {
    /// JSON config file.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,
    /// Port to bind (0 to auto-assign).
    #[arg(long)]
    port: Option<u16>,
    /// Default log level (error, warn, info, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,
    /// Send heartbeats on WebSocket connections.
    #[arg(long)]
    ws_heartbeat: bool,
    /// Seconds between heartbeats.
    #[arg(long)]
    heartbeat_interval: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            log_level: self.log_level.clone(),
            log_json: self.json_logs.then_some(true),
            heartbeat_websocket: self.ws_heartbeat.then_some(true),
            heartbeat_interval_secs: self.heartbeat_interval,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RelayConfig::load(cli.config.as_deref(), &cli.overrides())
        .context("failed to load configuration")?;

    relay_telemetry::init_telemetry(&config.log)?;
    let metrics = relay_telemetry::metrics::install_recorder()?;

    tracing::info!(
        host = %config.host,
        port = config.port,
        heartbeat_websocket = config.heartbeat.websocket,
        heartbeat_event_stream = config.heartbeat.event_stream,
        "starting relay"
    );

    let handle = RelayServer::new(config)
        .with_metrics(metrics)
        .listen()
        .await
        .context("failed to start relay")?;

    shutdown_signal().await;
    let _ = handle.shutdown("server shutting down").await;
    Ok(())
}
