// Copyright (c) 2024 Botho Foundation

//! Ephemeral node identity.
//!
//! Every pipeline run generates a fresh Ed25519 keypair that authenticates the
//! transport and signs nothing else. It is never written to disk, so each
//! restart shows up on the network as a new peer.

use libp2p::{identity::Keypair, PeerId};

/// Transport identity of one pipeline run.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    keypair: Keypair,
    peer_id: PeerId,
}

impl NodeIdentity {
    /// Generate a new Ed25519 identity.
    pub fn generate() -> Self {
        let keypair = Keypair::generate_ed25519();
        let peer_id = keypair.public().to_peer_id();
        Self { keypair, peer_id }
    }

    /// The libp2p keypair backing this identity.
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Peer id derived from the public key.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_matches_keypair() {
        let identity = NodeIdentity::generate();
        assert_eq!(
            identity.peer_id(),
            PeerId::from(identity.keypair().public())
        );
    }

    #[test]
    fn test_each_generation_is_fresh() {
        let a = NodeIdentity::generate();
        let b = NodeIdentity::generate();
        assert_ne!(a.peer_id(), b.peer_id());
    }
}
