//! voxmesh-relay: WebSocket signaling relay for full-mesh voice channels.
//!
//! Accepts WebSocket connections, binds each to the peer id of its first
//! `join`, and routes signaling between members of the same channel. Media
//! never passes through the relay.

mod connection;
mod hub;
mod server;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use voxmesh_config::{RelayConfig, VoxmeshConfig};

use crate::hub::RelayHub;

#[derive(Parser)]
#[command(name = "voxmesh-relay", about = "WebSocket signaling relay for voxmesh channels")]
struct Args {
    /// Port to listen on. Overrides the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum members per channel. Overrides the config file.
    #[arg(long)]
    max_peers: Option<usize>,

    /// Config file to load instead of the default location.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let loaded = match &args.config {
        Some(path) => voxmesh_config::toml_loader::load_from_path(path)
            .and_then(|c| voxmesh_config::validation::validate(&c).map(|_| c)),
        None => voxmesh_config::load_config(),
    };
    let (config, load_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (VoxmeshConfig::default(), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("voxmesh_relay={}", config.logging.level.as_directive()).into()
            }),
        )
        .init();

    if let Some(e) = load_error {
        tracing::warn!(error = %e, "failed to load config, using defaults");
    }

    let relay = apply_overrides(config.relay, &args);
    let hub = RelayHub::new(relay.max_peers);

    let addr = format!("0.0.0.0:{}", relay.port);
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(max_peers = relay.max_peers, "voxmesh-relay listening on {}", addr);

    let stats_hub = hub.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let (clients, channels) = stats_hub.counts().await;
            tracing::debug!(clients, channels, "relay stats");
        }
    });

    server::serve(
        listener,
        hub,
        Duration::from_secs(relay.handshake_timeout_secs),
    )
    .await;
}

fn apply_overrides(mut relay: RelayConfig, args: &Args) -> RelayConfig {
    if let Some(port) = args.port {
        relay.port = port;
    }
    if let Some(max_peers) = args.max_peers {
        relay.max_peers = max_peers;
    }
    relay
}
