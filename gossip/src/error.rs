// Copyright (c) 2024 Botho Foundation

//! Error types for the gossip listener.

use displaydoc::Display;
use libp2p::Multiaddr;
use thiserror::Error;

/// Errors that end a pipeline run.
///
/// None of these are fatal to the process: the supervisor logs them, backs
/// off, and starts a fresh run.
#[derive(Debug, Display, Error)]
pub enum ListenerError {
    /// Invalid connection policy: low watermark {low} exceeds high watermark {high}
    InvalidConnectionPolicy {
        /// Configured low watermark
        low: usize,
        /// Configured high watermark
        high: usize,
    },

    /// No usable listen address configured
    NoListenAddrs,

    /// Transport error: {0}
    Transport(String),

    /// Failed to build network behaviour: {0}
    Behaviour(String),

    /// Failed to listen on {addr}: {reason}
    Listen {
        /// Address that could not be bound
        addr: Multiaddr,
        /// Underlying transport error
        reason: String,
    },

    /// Failed to subscribe to topic {topic}: {reason}
    Subscribe {
        /// Topic name
        topic: String,
        /// Underlying gossipsub error
        reason: String,
    },

    /// Gossip channel closed
    ChannelClosed,

    /// All listeners closed
    ListenersClosed,

    /// Pipeline run returned without an error
    RunExited,

    /// Pipeline run panicked: {0}
    RunPanicked(String),

    /// Runtime error: {0}
    Runtime(String),
}

/// Result type for listener operations.
pub type ListenerResult<T> = Result<T, ListenerError>;
