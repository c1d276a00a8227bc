// Copyright (c) 2024 Botho Foundation

//! Bootstrap address resolution.
//!
//! Registration hands us comma-separated multiaddr lists. Bad entries are
//! skipped rather than failing startup, and the routing seed set only keeps
//! addresses that name a peer other than ourselves.

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};
use tracing::{debug, warn};

/// Split a comma-separated address list, skipping blanks and bad entries.
pub fn parse_addr_list(raw: &str) -> Vec<Multiaddr> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse::<Multiaddr>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!(entry, error = %e, "Skipping invalid multiaddr");
                None
            }
        })
        .collect()
}

/// Rewrite UDP addresses onto QUIC v1.
///
/// `/udp/<port>` without a QUIC component gets `/quic-v1` appended and the
/// legacy draft-29 `/quic` component becomes `/quic-v1`. Anything else is
/// returned untouched.
pub fn normalize_quic(addr: Multiaddr) -> Multiaddr {
    let mut out = Multiaddr::empty();
    let mut pending_udp = false;

    for proto in addr.iter() {
        match proto {
            Protocol::Udp(port) => {
                out.push(Protocol::Udp(port));
                pending_udp = true;
            }
            Protocol::Quic | Protocol::QuicV1 => {
                out.push(Protocol::QuicV1);
                pending_udp = false;
            }
            other => {
                if pending_udp {
                    out.push(Protocol::QuicV1);
                    pending_udp = false;
                }
                out.push(other);
            }
        }
    }

    if pending_udp {
        out.push(Protocol::QuicV1);
    }

    out
}

/// A configured bootstrap address and the peer it names, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPeer {
    /// Address with any `/p2p/<id>` suffix removed.
    pub addr: Multiaddr,

    /// Peer id taken from the `/p2p/<id>` component.
    pub peer_id: Option<PeerId>,
}

impl BootstrapPeer {
    /// Split a multiaddr into its transport address and peer id.
    pub fn parse(addr: &Multiaddr) -> Self {
        let mut transport = Multiaddr::empty();
        let mut peer_id = None;

        for proto in addr.iter() {
            match proto {
                Protocol::P2p(id) => peer_id = Some(id),
                other => transport.push(other),
            }
        }

        Self {
            addr: transport,
            peer_id,
        }
    }
}

/// Resolve the routing seed set.
///
/// Addresses without a peer id, and addresses naming `local_peer_id`, are
/// dropped.
pub fn seed_set(addrs: &[Multiaddr], local_peer_id: &PeerId) -> Vec<(PeerId, Multiaddr)> {
    addrs
        .iter()
        .map(BootstrapPeer::parse)
        .filter_map(|peer| match peer.peer_id {
            Some(id) if id == *local_peer_id => {
                debug!(addr = %peer.addr, "Skipping bootstrap peer pointing at ourselves");
                None
            }
            Some(id) => Some((id, peer.addr)),
            None => {
                warn!(addr = %peer.addr, "Skipping bootstrap address without /p2p peer id");
                None
            }
        })
        .collect()
}
