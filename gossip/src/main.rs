// Copyright (c) 2024 Botho Foundation

//! Standalone gossip listener.
//!
//! Runs the same supervised pipeline as the C entry point, but logs each
//! forwarded attestation instead of handing it to a callback.

use anyhow::Result;
use bth_gossip_listener::{AttestationSink, GossipPipeline, ListenerConfig, Supervisor};
use clap::Parser;
use tracing::info;

/// Number of payload bytes shown per logged attestation.
const PREVIEW_BYTES: usize = 16;

#[derive(Parser)]
#[command(name = "bth-gossip-listener")]
#[command(about = "Listen for quorum attestations on a gossip overlay", long_about = None)]
struct Cli {
    /// Network identifier (namespaces the routing table and topic)
    #[arg(long, default_value = "testnet")]
    network_id: String,

    /// Comma-separated bootstrap multiaddrs, each ending in /p2p/<peer-id>
    #[arg(long, default_value = "")]
    bootstrap: String,

    /// Comma-separated listen multiaddrs
    #[arg(long, default_value = "/ip4/0.0.0.0/udp/8999/quic-v1")]
    listen: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Logs attestations instead of forwarding them.
struct LoggingSink;

impl AttestationSink for LoggingSink {
    fn deliver(&self, payload: &[u8]) {
        let preview = &payload[..payload.len().min(PREVIEW_BYTES)];
        info!(
            len = payload.len(),
            prefix = %hex::encode(preview),
            "Received quorum attestation"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize simple logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let config = ListenerConfig::from_raw(&cli.network_id, &cli.bootstrap, &cli.listen);
    if config.listen_addrs.is_empty() {
        anyhow::bail!("no valid listen address in {:?}", cli.listen);
    }

    info!(
        network = %config.network_id,
        topic = %config.topic(),
        bootstrap_peers = config.bootstrap_peers.len(),
        "Starting gossip listener"
    );

    Supervisor::new(config, GossipPipeline::new(LoggingSink))
        .run()
        .await;

    Ok(())
}
