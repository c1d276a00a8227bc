// Copyright (c) 2024 Botho Foundation

//! One run of the listener, from identity to receive loop.
//!
//! A run provisions everything it needs from scratch, marks itself running
//! once subscribed, and then only ever returns with an error. Everything it
//! acquired is owned by locals and released when the run's task ends.

use crate::{
    bootstrap::seed_set,
    channel::{GossipChannel, GossipEnvelope},
    config::ListenerConfig,
    delivery::AttestationSink,
    error::ListenerResult,
    host::OverlayHost,
    identity::NodeIdentity,
    messages::filter_attestation,
    supervisor::{RunEpoch, SupervisorState, SupervisorStatus},
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Per-run inputs handed out by the supervisor.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Which run this is and when it started.
    pub epoch: RunEpoch,

    /// Shared, immutable listener configuration.
    pub config: Arc<ListenerConfig>,

    status: Arc<watch::Sender<SupervisorStatus>>,
}

impl RunContext {
    pub(crate) fn new(
        epoch: RunEpoch,
        config: Arc<ListenerConfig>,
        status: Arc<watch::Sender<SupervisorStatus>>,
    ) -> Self {
        Self {
            epoch,
            config,
            status,
        }
    }

    /// Report that the run has joined the topic and is receiving.
    pub fn mark_running(&self) {
        self.status.send_replace(SupervisorStatus {
            state: SupervisorState::Running,
            epoch: self.epoch,
        });
        info!(run = self.epoch.run, "Gossip pipeline running");
    }
}

/// Something the supervisor can run repeatedly.
#[async_trait]
pub trait Pipeline: Send + Sync + 'static {
    /// Execute one run. Returning, with or without an error, ends the run.
    async fn run(&self, ctx: RunContext) -> ListenerResult<()>;
}

/// The gossip listener pipeline.
pub struct GossipPipeline<S> {
    sink: S,
}

impl<S: AttestationSink> GossipPipeline<S> {
    /// Create a pipeline delivering to `sink`.
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Filter one envelope and deliver it if it carries an attestation.
    ///
    /// Returns whether a delivery was made. Never fails; undecodable and
    /// unmodelled envelopes are dropped.
    pub fn handle_envelope(&self, envelope: &GossipEnvelope) -> bool {
        match filter_attestation(&envelope.data) {
            Some(payload) => {
                debug!(
                    len = payload.len(),
                    from = %envelope.propagation_source,
                    author = ?envelope.author,
                    "Delivering quorum attestation"
                );
                self.sink.deliver(&payload);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl<S: AttestationSink + 'static> Pipeline for GossipPipeline<S> {
    async fn run(&self, ctx: RunContext) -> ListenerResult<()> {
        let identity = NodeIdentity::generate();
        info!(
            run = ctx.epoch.run,
            peer_id = %identity.peer_id(),
            "Generated node identity"
        );

        let mut host = OverlayHost::new(&identity, &ctx.config)?;

        let seeds = seed_set(&ctx.config.bootstrap_peers, &identity.peer_id());
        if seeds.is_empty() {
            warn!("No usable bootstrap peers, relying on inbound connections");
        }
        host.seed_router(&seeds);

        let mut channel = GossipChannel::join(host, &ctx.config)?;
        ctx.mark_running();

        loop {
            let envelope = channel.next().await?;
            self.handle_envelope(&envelope);
        }
    }
}
