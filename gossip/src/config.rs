// Copyright (c) 2024 Botho Foundation

//! Configuration for the gossip listener.
//!
//! The only externally supplied values are the network identifier and the two
//! comma-separated address lists handed over at registration. Everything else
//! (connection watermarks, restart timing, gossip limits) is a constant.

use crate::{
    bootstrap::{normalize_quic, parse_addr_list},
    error::{ListenerError, ListenerResult},
};
use libp2p::Multiaddr;
use std::time::Duration;

/// Peer count the connection manager trims down to.
pub const DEFAULT_LOW_WATERMARK: usize = 100;

/// Peer count above which the connection manager starts trimming.
pub const DEFAULT_HIGH_WATERMARK: usize = 400;

/// How long a fresh peer is protected from trimming.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::ZERO;

/// How often the connection manager re-checks the watermarks.
pub const TRIM_INTERVAL: Duration = Duration::from_secs(10);

/// Largest gossip message accepted from the network (1 MiB).
pub const DEFAULT_MAX_TRANSMIT_SIZE: usize = 1024 * 1024;

/// Idle connections without active streams are closed after this long.
pub const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs that fail sooner than this after starting are followed by a pause.
pub const RESTART_DWELL_THRESHOLD: Duration = Duration::from_secs(30);

/// Pause applied before restarting a run that failed quickly.
pub const RESTART_PAUSE: Duration = Duration::from_secs(1);

/// Suffix of the single topic this listener joins.
pub const BROADCAST_TOPIC_SUFFIX: &str = "broadcast";

/// Connection manager watermarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPolicy {
    low_watermark: usize,
    high_watermark: usize,
    grace_period: Duration,
}

impl ConnectionPolicy {
    /// Create a policy, rejecting `low > high`.
    pub fn new(
        low_watermark: usize,
        high_watermark: usize,
        grace_period: Duration,
    ) -> ListenerResult<Self> {
        if low_watermark > high_watermark {
            return Err(ListenerError::InvalidConnectionPolicy {
                low: low_watermark,
                high: high_watermark,
            });
        }

        Ok(Self {
            low_watermark,
            high_watermark,
            grace_period,
        })
    }

    /// Peer count to trim down to.
    pub fn low_watermark(&self) -> usize {
        self.low_watermark
    }

    /// Peer count that triggers trimming when exceeded.
    pub fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    /// Protection window for newly connected peers.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            low_watermark: DEFAULT_LOW_WATERMARK,
            high_watermark: DEFAULT_HIGH_WATERMARK,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Configuration shared by every pipeline run.
///
/// Built once at registration and never mutated afterwards; the supervisor
/// hands each run a shared reference to it.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Network identifier. Namespaces both the routing protocol and the topic.
    pub network_id: String,

    /// Seed peers for the routing table (libp2p multiaddrs).
    pub bootstrap_peers: Vec<Multiaddr>,

    /// Local addresses to listen on.
    pub listen_addrs: Vec<Multiaddr>,

    /// Connection manager watermarks.
    pub connection_policy: ConnectionPolicy,

    /// Maximum accepted gossip message size in bytes.
    pub max_transmit_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            network_id: "testnet".to_string(),
            bootstrap_peers: Vec::new(),
            listen_addrs: Vec::new(),
            connection_policy: ConnectionPolicy::default(),
            max_transmit_size: DEFAULT_MAX_TRANSMIT_SIZE,
        }
    }
}

impl ListenerConfig {
    /// Build a config from the raw registration strings.
    ///
    /// Invalid address entries are logged and skipped; this never fails.
    /// UDP addresses are rewritten to QUIC v1, the only transport we run.
    pub fn from_raw(network_id: &str, bootstrap_addrs: &str, listen_addrs: &str) -> Self {
        let quic = |raw: &str| -> Vec<Multiaddr> {
            parse_addr_list(raw).into_iter().map(normalize_quic).collect()
        };

        ListenerConfigBuilder::new()
            .network_id(network_id)
            .bootstrap_peers(quic(bootstrap_addrs))
            .listen_addrs(quic(listen_addrs))
            .build()
    }

    /// Name of the gossip topic: `{network_id}/broadcast`.
    pub fn topic(&self) -> String {
        format!("{}/{}", self.network_id, BROADCAST_TOPIC_SUFFIX)
    }

    /// Kademlia protocol, prefixed with the network id so unrelated networks
    /// sharing the substrate keep separate routing tables.
    pub fn kad_protocol(&self) -> String {
        format!("/{}/kad/1.0.0", self.network_id)
    }

    /// Protocol version advertised through identify.
    pub fn identify_protocol(&self) -> String {
        format!("/{}/1.0.0", self.network_id)
    }

    /// Check if we have any bootstrap peers configured.
    pub fn has_bootstrap_peers(&self) -> bool {
        !self.bootstrap_peers.is_empty()
    }
}

/// Builder for ListenerConfig.
#[derive(Debug, Default)]
pub struct ListenerConfigBuilder {
    config: ListenerConfig,
}

impl ListenerConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the network ID.
    pub fn network_id(mut self, id: impl Into<String>) -> Self {
        self.config.network_id = id.into();
        self
    }

    /// Add a bootstrap peer.
    pub fn add_bootstrap_peer(mut self, peer: Multiaddr) -> Self {
        self.config.bootstrap_peers.push(peer);
        self
    }

    /// Set bootstrap peers.
    pub fn bootstrap_peers(mut self, peers: Vec<Multiaddr>) -> Self {
        self.config.bootstrap_peers = peers;
        self
    }

    /// Add a listen address.
    pub fn add_listen_addr(mut self, addr: Multiaddr) -> Self {
        self.config.listen_addrs.push(addr);
        self
    }

    /// Set listen addresses.
    pub fn listen_addrs(mut self, addrs: Vec<Multiaddr>) -> Self {
        self.config.listen_addrs = addrs;
        self
    }

    /// Set the connection policy.
    pub fn connection_policy(mut self, policy: ConnectionPolicy) -> Self {
        self.config.connection_policy = policy;
        self
    }

    /// Build the config.
    pub fn build(self) -> ListenerConfig {
        self.config
    }
}
