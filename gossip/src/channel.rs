// Copyright (c) 2024 Botho Foundation

//! Subscription to the broadcast topic.

use crate::{
    config::ListenerConfig,
    error::{ListenerError, ListenerResult},
    host::{OverlayHost, ReceivedMessage},
};
use libp2p::{gossipsub::IdentTopic, PeerId};
use tracing::{debug, info, trace};

/// A message received on the broadcast topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipEnvelope {
    /// Raw payload bytes.
    pub data: Vec<u8>,

    /// Peer that relayed the message to us.
    pub propagation_source: PeerId,

    /// Original publisher, when the message is signed.
    pub author: Option<PeerId>,
}

/// The listener's only subscription.
///
/// Owns the host it was joined on, so dropping the channel unsubscribes and
/// then releases every network resource of the run.
pub struct GossipChannel {
    host: OverlayHost,
    topic: IdentTopic,
}

impl GossipChannel {
    /// Subscribe to `{network_id}/broadcast` on `host`.
    pub fn join(mut host: OverlayHost, config: &ListenerConfig) -> ListenerResult<Self> {
        let topic = IdentTopic::new(config.topic());

        host.gossipsub_mut()
            .subscribe(&topic)
            .map_err(|e| ListenerError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        info!(%topic, "Subscribed to broadcast topic");
        Ok(Self { host, topic })
    }

    /// The subscribed topic.
    pub fn topic(&self) -> &IdentTopic {
        &self.topic
    }

    /// Wait for the next message on the topic.
    ///
    /// An error here is terminal for the run.
    pub async fn next(&mut self) -> ListenerResult<GossipEnvelope> {
        loop {
            let ReceivedMessage {
                propagation_source,
                message,
            } = self.host.next_message().await?;

            if message.topic != self.topic.hash() {
                trace!(topic = %message.topic, "Ignoring message on foreign topic");
                continue;
            }

            return Ok(GossipEnvelope {
                data: message.data,
                propagation_source,
                author: message.source,
            });
        }
    }
}

impl Drop for GossipChannel {
    fn drop(&mut self) {
        // Fails only if we were never subscribed.
        let _ = self.host.gossipsub_mut().unsubscribe(&self.topic);
        debug!(topic = %self.topic, "Left broadcast topic");
    }
}
