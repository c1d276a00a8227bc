// Copyright (c) 2024 Botho Foundation

//! Gossip envelope schema and the attestation filter.
//!
//! Every payload on the broadcast topic is a protobuf `GossipMessage` whose
//! `oneof` carries one of several message kinds. The listener models two of
//! them: signed observations, which it decodes and discards, and signed VAAs
//! with quorum, whose raw bytes are forwarded. Any other kind (heartbeats,
//! governor updates, observation requests) decodes to nothing.
//!
//! Field numbers follow the `gossip.v1` schema used by the guardian network.

use displaydoc::Display;
use prost::Message;
use thiserror::Error;
use tracing::{debug, trace};

/// Top-level gossip envelope.
#[derive(Clone, PartialEq, Message)]
pub struct GossipMessage {
    /// The carried message, if it is one we model.
    #[prost(oneof = "gossip_message::Message", tags = "2, 4")]
    pub message: Option<gossip_message::Message>,
}

/// Variants of [`GossipMessage`].
pub mod gossip_message {
    /// The message kinds this listener understands.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Message {
        /// A single guardian's signature over an observation.
        #[prost(message, tag = "2")]
        SignedObservation(super::SignedObservation),

        /// A fully signed VAA.
        #[prost(message, tag = "4")]
        SignedVaaWithQuorum(super::SignedVaaWithQuorum),
    }
}

/// One guardian's observation of a message.
#[derive(Clone, PartialEq, Message)]
pub struct SignedObservation {
    /// Guardian key address.
    #[prost(bytes = "vec", tag = "1")]
    pub addr: Vec<u8>,

    /// Digest of the observed message.
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,

    /// Signature over `hash`.
    #[prost(bytes = "vec", tag = "3")]
    pub signature: Vec<u8>,

    /// Source chain transaction hash.
    #[prost(bytes = "vec", tag = "4")]
    pub tx_hash: Vec<u8>,

    /// Emitter-scoped message id.
    #[prost(string, tag = "5")]
    pub message_id: String,
}

/// A VAA carrying a quorum of guardian signatures.
#[derive(Clone, PartialEq, Message)]
pub struct SignedVaaWithQuorum {
    /// Serialized VAA.
    #[prost(bytes = "vec", tag = "1")]
    pub vaa: Vec<u8>,
}

impl GossipMessage {
    /// Wrap a signed VAA payload.
    pub fn quorum_attestation(vaa: impl Into<Vec<u8>>) -> Self {
        Self {
            message: Some(gossip_message::Message::SignedVaaWithQuorum(
                SignedVaaWithQuorum { vaa: vaa.into() },
            )),
        }
    }

    /// Wrap a signed observation.
    pub fn observation(observation: SignedObservation) -> Self {
        Self {
            message: Some(gossip_message::Message::SignedObservation(observation)),
        }
    }
}

/// Errors from decoding a gossip envelope.
#[derive(Debug, Display, Error)]
pub enum DecodeError {
    /// Malformed gossip envelope: {0}
    Malformed(#[from] prost::DecodeError),
}

/// A decoded envelope of a kind the listener models.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    /// Single-guardian observation. Never forwarded.
    Observation(SignedObservation),

    /// Quorum attestation with its serialized VAA.
    QuorumAttestation {
        /// Raw VAA bytes.
        payload: Vec<u8>,
    },
}

impl DecodedMessage {
    /// The payload to forward, if this message should be forwarded.
    pub fn into_attestation(self) -> Option<Vec<u8>> {
        match self {
            DecodedMessage::Observation(_) => None,
            DecodedMessage::QuorumAttestation { payload } => Some(payload),
        }
    }
}

/// Decode a gossip envelope.
///
/// Returns `Ok(None)` for envelopes that carry no message or a kind this
/// listener does not model.
pub fn decode(bytes: &[u8]) -> Result<Option<DecodedMessage>, DecodeError> {
    let envelope = GossipMessage::decode(bytes)?;

    Ok(envelope.message.map(|message| match message {
        gossip_message::Message::SignedObservation(observation) => {
            DecodedMessage::Observation(observation)
        }
        gossip_message::Message::SignedVaaWithQuorum(signed) => {
            DecodedMessage::QuorumAttestation {
                payload: signed.vaa,
            }
        }
    }))
}

/// Decode an envelope and extract a quorum attestation payload.
///
/// Decode failures are logged and swallowed.
pub fn filter_attestation(bytes: &[u8]) -> Option<Vec<u8>> {
    match decode(bytes) {
        Ok(Some(message)) => {
            trace!(?message, "Decoded gossip message");
            message.into_attestation()
        }
        Ok(None) => {
            trace!(len = bytes.len(), "Ignoring unmodelled gossip message");
            None
        }
        Err(e) => {
            debug!(error = %e, len = bytes.len(), "Dropping undecodable gossip message");
            None
        }
    }
}
