// Copyright (c) 2024 Botho Foundation

//! Read-only gossip listener that forwards quorum attestations.
//!
//! The listener joins a libp2p overlay, discovers peers through a Kademlia
//! routing table namespaced by network id, subscribes to the single topic
//! `<network-id>/broadcast` and hands every signed VAA with quorum to an
//! external consumer. It never publishes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Supervisor                           │
//! │   restarts runs, 1s pause after runs shorter than 30s        │
//! ├──────────────────────────────────────────────────────────────┤
//! │                      GossipPipeline (one run)                │
//! │  ┌────────────┐  ┌─────────────┐  ┌──────────────────────┐  │
//! │  │NodeIdentity│─>│ OverlayHost │─>│ GossipChannel        │  │
//! │  │ (ed25519)  │  │ QUIC + kad  │  │ <network>/broadcast  │  │
//! │  └────────────┘  └─────────────┘  └──────────┬───────────┘  │
//! │                                              v              │
//! │                          messages::filter_attestation       │
//! │                                              v              │
//! │                              AttestationSink::deliver       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! From C (or anything that links the `cdylib`/`staticlib`), call
//! `RegisterObservationCallback` once; see `include/gossip_listener.h`.
//!
//! From Rust:
//!
//! ```ignore
//! use bth_gossip_listener::{GossipPipeline, ListenerConfig, Supervisor};
//!
//! let config = ListenerConfig::from_raw(
//!     "testnet",
//!     "/dns4/seed.example/udp/8999/quic-v1/p2p/12D3KooW...",
//!     "/ip4/0.0.0.0/udp/8999/quic-v1",
//! );
//! Supervisor::new(config, GossipPipeline::new(my_sink)).run().await;
//! ```

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod behaviour;
pub mod bootstrap;
pub mod channel;
pub mod config;
pub mod connection_manager;
pub mod delivery;
pub mod error;
pub mod ffi;
pub mod host;
pub mod identity;
pub mod messages;
pub mod pipeline;
pub mod supervisor;

// Re-export main types for convenience
pub use behaviour::{ListenerBehaviour, ListenerEvent};
pub use bootstrap::{normalize_quic, parse_addr_list, seed_set, BootstrapPeer};
pub use channel::{GossipChannel, GossipEnvelope};
pub use config::{ConnectionPolicy, ListenerConfig, ListenerConfigBuilder};
pub use connection_manager::ConnectionManager;
pub use delivery::{AttestationSink, ForeignCallback, Observation, ObservationCallback};
pub use error::{ListenerError, ListenerResult};
pub use ffi::{init_logging, spawn_listener, RegisterObservationCallback};
pub use host::OverlayHost;
pub use identity::NodeIdentity;
pub use messages::{decode, filter_attestation, DecodeError, DecodedMessage, GossipMessage};
pub use pipeline::{GossipPipeline, Pipeline, RunContext};
pub use supervisor::{backoff_delay, RunEpoch, Supervisor, SupervisorState, SupervisorStatus};
