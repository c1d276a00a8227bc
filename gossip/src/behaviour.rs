// Copyright (c) 2024 Botho Foundation

//! libp2p network behaviour for the gossip listener.
//!
//! This module wires together:
//! - Gossipsub for receiving broadcast messages
//! - Kademlia DHT for peer discovery, namespaced by network id
//! - Identify for learning peers' listen addresses

use crate::{
    config::ListenerConfig,
    error::{ListenerError, ListenerResult},
};
use libp2p::{
    gossipsub::{self, MessageAuthenticity, ValidationMode},
    identify,
    identity::Keypair,
    kad::{self, store::MemoryStore, Mode},
    swarm::NetworkBehaviour,
    StreamProtocol,
};
use std::time::Duration;

/// Agent version reported through identify.
pub const AGENT_VERSION: &str = concat!("bth-gossip-listener/", env!("CARGO_PKG_VERSION"));

/// Events surfaced by [`ListenerBehaviour`] to the swarm.
#[derive(Debug)]
pub enum ListenerEvent {
    /// Gossipsub message or subscription change
    Gossipsub(gossipsub::Event),
    /// Kademlia routing and query progress
    Kademlia(kad::Event),
    /// Identify exchange with a peer
    Identify(identify::Event),
}

impl From<gossipsub::Event> for ListenerEvent {
    fn from(event: gossipsub::Event) -> Self {
        Self::Gossipsub(event)
    }
}

impl From<kad::Event> for ListenerEvent {
    fn from(event: kad::Event) -> Self {
        Self::Kademlia(event)
    }
}

impl From<identify::Event> for ListenerEvent {
    fn from(event: identify::Event) -> Self {
        Self::Identify(event)
    }
}

/// Combined network behaviour for the listener.
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "ListenerEvent")]
pub struct ListenerBehaviour {
    /// Gossipsub for pub/sub messaging
    pub gossipsub: gossipsub::Behaviour,

    /// Kademlia DHT for peer discovery
    pub kademlia: kad::Behaviour<MemoryStore>,

    /// Identify protocol for peer identification
    pub identify: identify::Behaviour,
}

impl ListenerBehaviour {
    /// Create the behaviour for the node identified by `key`.
    pub fn new(key: &Keypair, config: &ListenerConfig) -> ListenerResult<Self> {
        let local_peer_id = key.public().to_peer_id();

        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(Duration::from_secs(1))
            .validation_mode(ValidationMode::Strict)
            .max_transmit_size(config.max_transmit_size)
            .build()
            .map_err(|e| ListenerError::Behaviour(e.to_string()))?;

        let gossipsub =
            gossipsub::Behaviour::new(MessageAuthenticity::Signed(key.clone()), gossipsub_config)
                .map_err(|e| ListenerError::Behaviour(e.to_string()))?;

        let protocol = StreamProtocol::try_from_owned(config.kad_protocol())
            .map_err(|e| ListenerError::Behaviour(e.to_string()))?;
        let mut kademlia = kad::Behaviour::with_config(
            local_peer_id,
            MemoryStore::new(local_peer_id),
            kad::Config::new(protocol),
        );
        // Serve routing queries even before any address is confirmed external.
        kademlia.set_mode(Some(Mode::Server));

        let identify = identify::Behaviour::new(
            identify::Config::new(config.identify_protocol(), key.public())
                .with_agent_version(AGENT_VERSION.to_string()),
        );

        Ok(Self {
            gossipsub,
            kademlia,
            identify,
        })
    }
}
