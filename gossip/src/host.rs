// Copyright (c) 2024 Botho Foundation

//! The overlay host: one libp2p swarm per pipeline run.
//!
//! The host owns every network resource a run acquires (sockets, listeners,
//! connections, the routing table). It runs QUIC only, so TLS 1.3 and stream
//! multiplexing come from the transport itself, with DNS resolution layered
//! on top for `/dns*` bootstrap addresses.

use crate::{
    behaviour::{ListenerBehaviour, ListenerEvent},
    config::{ListenerConfig, IDLE_CONNECTION_TIMEOUT, TRIM_INTERVAL},
    connection_manager::ConnectionManager,
    error::{ListenerError, ListenerResult},
    identity::NodeIdentity,
};
use futures::StreamExt;
use libp2p::{
    core::transport::ListenerId,
    gossipsub, identify, kad,
    swarm::{dial_opts::DialOpts, SwarmEvent},
    Multiaddr, PeerId, Swarm, SwarmBuilder,
};
use std::{collections::HashSet, time::Instant};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// A gossipsub message together with the peer that relayed it to us.
#[derive(Debug)]
pub struct ReceivedMessage {
    /// Peer the message arrived from.
    pub propagation_source: PeerId,
    /// The gossipsub message.
    pub message: gossipsub::Message,
}

/// Network host for a single pipeline run.
pub struct OverlayHost {
    swarm: Swarm<ListenerBehaviour>,
    listeners: HashSet<ListenerId>,
    connections: ConnectionManager,
    trim_tick: Interval,
}

impl OverlayHost {
    /// Build the swarm and start listening on every configured address.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(identity: &NodeIdentity, config: &ListenerConfig) -> ListenerResult<Self> {
        if config.listen_addrs.is_empty() {
            return Err(ListenerError::NoListenAddrs);
        }

        let mut swarm = SwarmBuilder::with_existing_identity(identity.keypair().clone())
            .with_tokio()
            .with_quic()
            .with_dns()
            .map_err(|e| ListenerError::Transport(e.to_string()))?
            .with_behaviour(|key| {
                ListenerBehaviour::new(key, config)
                    .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
            })
            .map_err(|e| ListenerError::Behaviour(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
            .build();

        let mut listeners = HashSet::new();
        for addr in &config.listen_addrs {
            let id = swarm
                .listen_on(addr.clone())
                .map_err(|e| ListenerError::Listen {
                    addr: addr.clone(),
                    reason: e.to_string(),
                })?;
            listeners.insert(id);
        }

        let mut trim_tick = interval(TRIM_INTERVAL);
        trim_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            peer_id = %identity.peer_id(),
            listeners = listeners.len(),
            "Overlay host started"
        );

        Ok(Self {
            swarm,
            listeners,
            connections: ConnectionManager::new(config.connection_policy),
            trim_tick,
        })
    }

    /// Our peer id.
    pub fn local_peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    /// Number of listeners still open.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Number of distinct connected peers.
    pub fn connected_peers(&self) -> usize {
        self.connections.peer_count()
    }

    pub(crate) fn gossipsub_mut(&mut self) -> &mut gossipsub::Behaviour {
        &mut self.swarm.behaviour_mut().gossipsub
    }

    /// Seed the routing table, dial each seed and start a bootstrap query.
    ///
    /// Nothing here is fatal: a seed we cannot dial is simply absent from the
    /// routing table until discovered some other way.
    pub fn seed_router(&mut self, seeds: &[(PeerId, Multiaddr)]) {
        for (peer_id, addr) in seeds {
            self.swarm
                .behaviour_mut()
                .kademlia
                .add_address(peer_id, addr.clone());

            let opts = DialOpts::peer_id(*peer_id)
                .addresses(vec![addr.clone()])
                .build();
            match self.swarm.dial(opts) {
                Ok(()) => info!(%peer_id, %addr, "Dialing bootstrap peer"),
                Err(e) => warn!(%peer_id, %addr, error = %e, "Failed to dial bootstrap peer"),
            }
        }

        if let Err(e) = self.swarm.behaviour_mut().kademlia.bootstrap() {
            debug!(error = ?e, "Routing table bootstrap not started");
        }
    }

    /// Drive the swarm until a gossipsub message arrives.
    ///
    /// Fails when the swarm stops producing events or every listener has
    /// closed.
    pub async fn next_message(&mut self) -> ListenerResult<ReceivedMessage> {
        loop {
            tokio::select! {
                event = self.swarm.next() => {
                    let event = event.ok_or(ListenerError::ChannelClosed)?;
                    if let Some(received) = self.handle_event(event)? {
                        return Ok(received);
                    }
                }
                _ = self.trim_tick.tick() => self.trim_connections(),
            }
        }
    }

    fn handle_event(
        &mut self,
        event: SwarmEvent<ListenerEvent>,
    ) -> ListenerResult<Option<ReceivedMessage>> {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "Listening on");
            }

            SwarmEvent::ListenerClosed {
                listener_id,
                reason,
                ..
            } => {
                warn!(?listener_id, ?reason, "Listener closed");
                self.listeners.remove(&listener_id);
                if self.listeners.is_empty() {
                    return Err(ListenerError::ListenersClosed);
                }
            }

            SwarmEvent::ListenerError { listener_id, error } => {
                warn!(?listener_id, %error, "Listener error");
            }

            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!(%peer_id, "Connected to peer");
                self.connections
                    .connection_established(peer_id, Instant::now());
                if self.connections.over_limit() {
                    self.trim_connections();
                }
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                debug!(%peer_id, remaining = num_established, "Connection closed");
                self.connections.connection_closed(&peer_id, num_established);
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                debug!(?peer_id, %error, "Outgoing connection failed");
            }

            SwarmEvent::Behaviour(event) => return Ok(self.handle_behaviour_event(event)),

            _ => {}
        }

        Ok(None)
    }

    fn handle_behaviour_event(&mut self, event: ListenerEvent) -> Option<ReceivedMessage> {
        match event {
            ListenerEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            }) => {
                return Some(ReceivedMessage {
                    propagation_source,
                    message,
                });
            }

            ListenerEvent::Gossipsub(gossipsub::Event::Subscribed { peer_id, topic }) => {
                debug!(%peer_id, %topic, "Peer subscribed");
            }

            ListenerEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
                trace!(%peer_id, agent = %info.agent_version, "Identified peer");
                let kademlia = &mut self.swarm.behaviour_mut().kademlia;
                for addr in info.listen_addrs {
                    kademlia.add_address(&peer_id, addr);
                }
            }

            ListenerEvent::Kademlia(kad::Event::OutboundQueryProgressed {
                result: kad::QueryResult::Bootstrap(result),
                ..
            }) => match result {
                Ok(ok) => debug!(peer = %ok.peer, remaining = ok.num_remaining, "Bootstrap progressed"),
                Err(e) => debug!(error = ?e, "Bootstrap query failed"),
            },

            ListenerEvent::Kademlia(kad::Event::RoutingUpdated { peer, .. }) => {
                trace!(%peer, "Routing table updated");
            }

            _ => {}
        }

        None
    }

    fn trim_connections(&mut self) {
        for peer in self.connections.peers_to_prune(Instant::now()) {
            if self.swarm.disconnect_peer_id(peer).is_err() {
                trace!(%peer, "Peer already disconnected");
            }
        }
    }
}

impl Drop for OverlayHost {
    fn drop(&mut self) {
        for id in self.listeners.drain() {
            self.swarm.remove_listener(id);
        }
        debug!(peer_id = %self.swarm.local_peer_id(), "Overlay host released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerConfigBuilder;
    use std::time::Duration;

    fn config_with_listen(addr: &str) -> ListenerConfig {
        ListenerConfigBuilder::new()
            .add_listen_addr(addr.parse().unwrap())
            .build()
    }

    #[tokio::test]
    async fn test_no_listen_addrs_is_an_error() {
        let config = ListenerConfigBuilder::new().build();
        let result = OverlayHost::new(&NodeIdentity::generate(), &config);
        assert!(matches!(result, Err(ListenerError::NoListenAddrs)));
    }

    #[tokio::test]
    async fn test_unsupported_listen_addr_is_an_error() {
        let config = config_with_listen("/ip4/127.0.0.1/tcp/0");
        let result = OverlayHost::new(&NodeIdentity::generate(), &config);
        assert!(matches!(result, Err(ListenerError::Listen { .. })));
    }

    #[tokio::test]
    async fn test_host_listens_on_quic() {
        let identity = NodeIdentity::generate();
        let config = config_with_listen("/ip4/127.0.0.1/udp/0/quic-v1");
        let host = OverlayHost::new(&identity, &config).unwrap();

        assert_eq!(host.local_peer_id(), identity.peer_id());
        assert_eq!(host.listener_count(), 1);
        assert_eq!(host.connected_peers(), 0);
    }

    /// Swarm that only runs identify, used to see what the host advertises.
    async fn observer() -> (Swarm<identify::Behaviour>, PeerId, Multiaddr) {
        let key = libp2p::identity::Keypair::generate_ed25519();
        let peer_id = key.public().to_peer_id();
        let mut swarm = SwarmBuilder::with_existing_identity(key)
            .with_tokio()
            .with_quic()
            .with_behaviour(|key| {
                identify::Behaviour::new(identify::Config::new(
                    "/observer/1.0.0".to_string(),
                    key.public(),
                ))
            })
            .unwrap()
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(30)))
            .build();

        swarm
            .listen_on("/ip4/127.0.0.1/udp/0/quic-v1".parse().unwrap())
            .unwrap();
        let addr = loop {
            if let SwarmEvent::NewListenAddr { address, .. } = swarm.select_next_some().await {
                break address;
            }
        };

        (swarm, peer_id, addr)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_host_serves_network_routing_protocol() {
        let (mut observer, observer_id, observer_addr) = observer().await;

        let config = ListenerConfigBuilder::new()
            .network_id("devnet")
            .add_listen_addr("/ip4/127.0.0.1/udp/0/quic-v1".parse().unwrap())
            .build();
        let mut host = OverlayHost::new(&NodeIdentity::generate(), &config).unwrap();
        let host_id = host.local_peer_id();
        host.seed_router(&[(observer_id, observer_addr)]);

        let driver = tokio::spawn(async move {
            while host.next_message().await.is_ok() {}
        });

        let info = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let SwarmEvent::Behaviour(identify::Event::Received { peer_id, info, .. }) =
                    observer.select_next_some().await
                {
                    if peer_id == host_id {
                        break info;
                    }
                }
            }
        })
        .await
        .expect("host never identified itself");
        driver.abort();

        // Kademlia only advertises its protocol for inbound streams in server mode.
        assert!(info
            .protocols
            .iter()
            .any(|p| p.as_ref() == "/devnet/kad/1.0.0"));
        assert_eq!(info.protocol_version, config.identify_protocol());
        assert_eq!(info.agent_version, crate::behaviour::AGENT_VERSION);
    }

    #[tokio::test]
    async fn test_seed_router_without_seeds_is_not_fatal() {
        let config = config_with_listen("/ip4/127.0.0.1/udp/0/quic-v1");
        let mut host = OverlayHost::new(&NodeIdentity::generate(), &config).unwrap();
        host.seed_router(&[]);
        assert_eq!(host.listener_count(), 1);
    }
}
