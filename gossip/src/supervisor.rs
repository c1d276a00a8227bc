// Copyright (c) 2024 Botho Foundation

//! Crash-recovery loop around the pipeline.
//!
//! The supervisor runs the pipeline forever. Each run is spawned as its own
//! task and awaited, so a panic inside a run is contained and a new run can
//! only begin once the previous one has released everything it held.
//!
//! ```text
//! Starting --(subscribed)--> Running
//!    ^                          |
//!    |                        (error)
//!    |                          v
//!    +------ Backoff <------ Failed
//! ```
//!
//! Every failure passes through `Backoff`. The pause there is one second
//! when the run lasted under 30s and zero otherwise.

use crate::{
    config::{ListenerConfig, RESTART_DWELL_THRESHOLD, RESTART_PAUSE},
    error::{ListenerError, ListenerResult},
    pipeline::{Pipeline, RunContext},
};
use std::{any::Any, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle},
    time::Instant,
};
use tracing::{debug, info, warn};

/// Lifecycle state of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Provisioning identity, host and subscription.
    Starting,
    /// Subscribed and delivering.
    Running,
    /// The run ended.
    Failed,
    /// Pausing before the next run.
    Backoff,
}

/// Identifies a run and when it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunEpoch {
    /// 1-based run counter.
    pub run: u64,
    /// When the run started.
    pub started_at: Instant,
}

/// What the supervisor is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStatus {
    /// Current state.
    pub state: SupervisorState,
    /// The run the state refers to.
    pub epoch: RunEpoch,
}

/// Pause to apply after a run that lasted `elapsed`.
pub fn backoff_delay(elapsed: Duration) -> Option<Duration> {
    (elapsed < RESTART_DWELL_THRESHOLD).then_some(RESTART_PAUSE)
}

/// Restarts a [`Pipeline`] whenever a run ends.
pub struct Supervisor<P> {
    config: Arc<ListenerConfig>,
    pipeline: Arc<P>,
    status: Arc<watch::Sender<SupervisorStatus>>,
}

impl<P: Pipeline> Supervisor<P> {
    /// Create a supervisor. Nothing runs until [`Supervisor::run`] or
    /// [`Supervisor::spawn`].
    pub fn new(config: ListenerConfig, pipeline: P) -> Self {
        let (status, _) = watch::channel(SupervisorStatus {
            state: SupervisorState::Starting,
            epoch: RunEpoch {
                run: 0,
                started_at: Instant::now(),
            },
        });

        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            status: Arc::new(status),
        }
    }

    /// Watch state transitions.
    pub fn status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.subscribe()
    }

    /// Run the pipeline forever.
    pub async fn run(self) {
        let mut run = 0;

        loop {
            run += 1;
            let epoch = RunEpoch {
                run,
                started_at: Instant::now(),
            };
            self.publish(SupervisorState::Starting, epoch);
            info!(run, network = %self.config.network_id, "Starting gossip pipeline");

            let error = match self.run_once(epoch).await {
                Ok(()) => ListenerError::RunExited,
                Err(e) => e,
            };

            self.after_failure(epoch, &error).await;
        }
    }

    /// Run the supervisor on a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run_once(&self, epoch: RunEpoch) -> ListenerResult<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let ctx = RunContext::new(epoch, Arc::clone(&self.config), Arc::clone(&self.status));

        let mut task = AbortOnDrop(tokio::spawn(async move { pipeline.run(ctx).await }));

        match (&mut task.0).await {
            Ok(result) => result,
            Err(e) => Err(join_error(e)),
        }
    }

    /// Failed, then Backoff, then the restart pause when the run was short.
    async fn after_failure(&self, epoch: RunEpoch, error: &ListenerError) {
        let elapsed = epoch.started_at.elapsed();

        self.publish(SupervisorState::Failed, epoch);
        warn!(
            run = epoch.run,
            error = %error,
            uptime_ms = elapsed.as_millis() as u64,
            "Gossip pipeline failed"
        );

        self.publish(SupervisorState::Backoff, epoch);
        if let Some(pause) = backoff_delay(elapsed) {
            debug!(?pause, "Pausing before restart");
            tokio::time::sleep(pause).await;
        }
    }

    fn publish(&self, state: SupervisorState, epoch: RunEpoch) {
        self.status.send_replace(SupervisorStatus { state, epoch });
    }
}

/// Aborts the run's task if the supervisor itself is cancelled mid-run.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn join_error(e: JoinError) -> ListenerError {
    if e.is_panic() {
        ListenerError::RunPanicked(panic_message(e.into_panic()))
    } else {
        ListenerError::Runtime(e.to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
