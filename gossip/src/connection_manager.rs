// Copyright (c) 2024 Botho Foundation

//! Watermark-based connection trimming.
//!
//! libp2p gives us per-connection events but no policy for how many peers to
//! keep. The manager counts connected peers; once the count exceeds the high
//! watermark it picks peers to disconnect until only the low watermark
//! remains. Peers connected for less than the grace period are never picked.

use crate::config::ConnectionPolicy;
use libp2p::PeerId;
use std::{collections::HashMap, time::Instant};
use tracing::debug;

/// Per-peer bookkeeping.
#[derive(Debug, Clone, Copy)]
struct PeerEntry {
    /// When the first of the peer's current connections was established.
    connected_at: Instant,
    /// Number of open connections to the peer.
    connections: u32,
}

/// Tracks connected peers against a [`ConnectionPolicy`].
#[derive(Debug)]
pub struct ConnectionManager {
    policy: ConnectionPolicy,
    peers: HashMap<PeerId, PeerEntry>,
}

impl ConnectionManager {
    /// Create a manager enforcing `policy`.
    pub fn new(policy: ConnectionPolicy) -> Self {
        Self {
            policy,
            peers: HashMap::new(),
        }
    }

    /// Number of distinct connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Whether the high watermark has been exceeded.
    pub fn over_limit(&self) -> bool {
        self.peers.len() > self.policy.high_watermark()
    }

    /// Record a newly established connection.
    pub fn connection_established(&mut self, peer: PeerId, now: Instant) {
        self.peers
            .entry(peer)
            .and_modify(|entry| entry.connections += 1)
            .or_insert(PeerEntry {
                connected_at: now,
                connections: 1,
            });
    }

    /// Record a closed connection. `remaining` is the number of connections
    /// to the peer still open, as reported by the swarm.
    pub fn connection_closed(&mut self, peer: &PeerId, remaining: u32) {
        if remaining == 0 {
            self.peers.remove(peer);
        } else if let Some(entry) = self.peers.get_mut(peer) {
            entry.connections = remaining;
        }
    }

    /// Peers to disconnect to get back down to the low watermark.
    ///
    /// Empty unless the high watermark is exceeded. Peers still inside the
    /// grace period are skipped; among the rest the most recently connected
    /// go first, which keeps long-lived mesh peers in place.
    pub fn peers_to_prune(&self, now: Instant) -> Vec<PeerId> {
        if !self.over_limit() {
            return Vec::new();
        }

        let excess = self.peers.len() - self.policy.low_watermark();
        let grace = self.policy.grace_period();

        let mut candidates: Vec<_> = self
            .peers
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.connected_at) >= grace)
            .map(|(peer, entry)| (*peer, entry.connected_at))
            .collect();

        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        candidates.truncate(excess);

        debug!(
            peers = self.peers.len(),
            high = self.policy.high_watermark(),
            low = self.policy.low_watermark(),
            pruning = candidates.len(),
            "Connection count over high watermark"
        );

        candidates.into_iter().map(|(peer, _)| peer).collect()
    }
}
