// Copyright (c) 2024 Botho Foundation

//! End-to-end tests for the gossip listener.
//!
//! These tests run the supervised pipeline against real QUIC sockets on
//! localhost and verify that:
//! - A listener with no bootstrap peers still reaches the running state
//! - Attestations published by a peer reach the C callback exactly once
//! - Observations and garbage never reach the callback or end the run
//! - A host that cannot start is restarted with a pause between runs

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    gossipsub::{self, IdentTopic, MessageAuthenticity},
    identity,
    swarm::SwarmEvent,
    Multiaddr, PeerId, Swarm,
};
use prost::Message;
use tokio::time::{interval, sleep, timeout, Instant};

use bth_gossip_listener::{
    messages::SignedObservation, ForeignCallback, GossipMessage, GossipPipeline, ListenerConfig,
    ListenerResult, Observation, Pipeline, RunContext, Supervisor, SupervisorState,
};

const NETWORK_ID: &str = "testnet";

/// Gossipsub-only peer that publishes to the listener.
#[derive(libp2p::swarm::NetworkBehaviour)]
struct PublisherBehaviour {
    gossipsub: gossipsub::Behaviour,
}

/// Create a publisher swarm listening on localhost QUIC.
async fn create_publisher() -> (Swarm<PublisherBehaviour>, PeerId, Multiaddr) {
    let local_key = identity::Keypair::generate_ed25519();
    let local_peer_id = PeerId::from(local_key.public());

    let mut swarm = libp2p::SwarmBuilder::with_existing_identity(local_key)
        .with_tokio()
        .with_quic()
        .with_behaviour(|key| {
            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_millis(100))
                .validation_mode(gossipsub::ValidationMode::Strict)
                .build()
                .expect("valid gossipsub config");

            let gossipsub = gossipsub::Behaviour::new(
                MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .expect("valid gossipsub behaviour");

            Ok(PublisherBehaviour { gossipsub })
        })
        .unwrap()
        .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(30)))
        .build();

    let topic = IdentTopic::new(format!("{NETWORK_ID}/broadcast"));
    swarm.behaviour_mut().gossipsub.subscribe(&topic).unwrap();

    swarm
        .listen_on("/ip4/127.0.0.1/udp/0/quic-v1".parse().unwrap())
        .unwrap();

    let actual_addr = loop {
        match swarm.select_next_some().await {
            SwarmEvent::NewListenAddr { address, .. } => break address,
            _ => continue,
        }
    };

    (swarm, local_peer_id, actual_addr)
}

/// Drive the publisher, publishing each payload in order once a subscriber
/// is known. Publishing is retried until gossipsub accepts it.
fn spawn_publisher(
    mut swarm: Swarm<PublisherBehaviour>,
    payloads: Vec<Vec<u8>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let topic = IdentTopic::new(format!("{NETWORK_ID}/broadcast"));
        let mut pending = payloads.into_iter().peekable();
        let mut tick = interval(Duration::from_millis(200));

        loop {
            tokio::select! {
                _ = swarm.select_next_some() => {}
                _ = tick.tick() => {
                    if let Some(payload) = pending.peek() {
                        if swarm
                            .behaviour_mut()
                            .gossipsub
                            .publish(topic.clone(), payload.clone())
                            .is_ok()
                        {
                            pending.next();
                        }
                    }
                }
            }
        }
    })
}

static DELIVERED: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

extern "C" fn record_observation(observation: Observation) {
    let bytes =
        unsafe { std::slice::from_raw_parts(observation.vaa.cast::<u8>(), observation.vaa_len) };
    DELIVERED.lock().unwrap().push(bytes.to_vec());
}

/// Records when each run starts, then runs the real pipeline.
struct RecordingPipeline<P> {
    inner: P,
    starts: Arc<Mutex<Vec<Instant>>>,
}

#[async_trait]
impl<P: Pipeline> Pipeline for RecordingPipeline<P> {
    async fn run(&self, ctx: RunContext) -> ListenerResult<()> {
        self.starts.lock().unwrap().push(Instant::now());
        self.inner.run(ctx).await
    }
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaches_running_without_bootstrap_peers() {
    let config = ListenerConfig::from_raw(NETWORK_ID, "", "/ip4/127.0.0.1/udp/0");
    let supervisor = Supervisor::new(config, GossipPipeline::new(ForeignCallback::new(noop)));
    let mut status = supervisor.status();
    let handle = supervisor.spawn();

    let run = timeout(
        Duration::from_secs(10),
        status.wait_for(|s| s.state == SupervisorState::Running),
    )
    .await
    .expect("listener never reached running")
    .unwrap()
    .epoch
    .run;

    assert_eq!(run, 1);

    handle.abort();
}

extern "C" fn noop(_observation: Observation) {}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_published_attestation_is_delivered_once() {
    let (publisher, publisher_id, publisher_addr) = create_publisher().await;

    let observation = SignedObservation {
        addr: vec![0xaa; 20],
        hash: vec![0x01; 32],
        ..Default::default()
    };
    // Nothing is accepted for publishing until the listener has subscribed.
    let publisher = spawn_publisher(
        publisher,
        vec![
            b"\xff\xff\xff\xff".to_vec(),
            GossipMessage::observation(observation).encode_to_vec(),
            GossipMessage::quorum_attestation(b"abc".to_vec()).encode_to_vec(),
        ],
    );

    let config = ListenerConfig::from_raw(
        NETWORK_ID,
        &format!("{publisher_addr}/p2p/{publisher_id}"),
        "/ip4/127.0.0.1/udp/0/quic-v1",
    );
    let supervisor = Supervisor::new(
        config,
        GossipPipeline::new(ForeignCallback::new(record_observation)),
    );
    let mut status = supervisor.status();
    let listener = supervisor.spawn();

    timeout(
        Duration::from_secs(10),
        status.wait_for(|s| s.state == SupervisorState::Running),
    )
    .await
    .expect("listener never reached running")
    .unwrap();

    let delivered = timeout(Duration::from_secs(30), async {
        loop {
            if !DELIVERED.lock().unwrap().is_empty() {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(delivered.is_ok(), "attestation was never delivered");

    // Give any duplicate a chance to show up.
    sleep(Duration::from_secs(1)).await;

    {
        let delivered = DELIVERED.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0], b"abc".to_vec());
        assert_eq!(delivered[0].len(), 3);
    }

    // Garbage and observations did not end the run.
    let current = *status.borrow();
    assert_eq!(current.state, SupervisorState::Running);
    assert_eq!(current.epoch.run, 1);

    publisher.abort();
    listener.abort();
}

// ============================================================================
// Restart
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_host_is_restarted_after_pause() {
    // QUIC-only transport cannot bind TCP, so every run fails at host setup.
    let config = ListenerConfig::from_raw(NETWORK_ID, "", "/ip4/127.0.0.1/tcp/0");
    let starts = Arc::new(Mutex::new(Vec::new()));
    let pipeline = RecordingPipeline {
        inner: GossipPipeline::new(ForeignCallback::new(noop)),
        starts: starts.clone(),
    };

    let supervisor = Supervisor::new(config, pipeline);
    let mut status = supervisor.status();
    let handle = supervisor.spawn();

    timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.state == SupervisorState::Backoff),
    )
    .await
    .expect("supervisor never backed off")
    .unwrap();

    sleep(Duration::from_millis(3500)).await;
    handle.abort();

    let starts = starts.lock().unwrap().clone();
    assert!(starts.len() >= 2, "only {} run(s) started", starts.len());
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(1));
    }
    assert_ne!(status.borrow().state, SupervisorState::Running);
}
