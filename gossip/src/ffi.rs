// Copyright (c) 2024 Botho Foundation

//! C ABI registration entry point.
//!
//! See `include/gossip_listener.h` for the C declarations.

use crate::{
    config::ListenerConfig,
    delivery::{AttestationSink, ForeignCallback, ObservationCallback},
    error::{ListenerError, ListenerResult},
    pipeline::GossipPipeline,
    supervisor::Supervisor,
};
use std::{
    borrow::Cow,
    ffi::{c_char, CStr},
    thread,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Name of the OS thread hosting the listener runtime.
pub const LISTENER_THREAD_NAME: &str = "gossip-listener";

/// Install a `RUST_LOG`-driven subscriber unless the host already has one.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // An already-installed subscriber wins.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Start the supervised listener on a dedicated thread with its own
/// multi-threaded tokio runtime.
///
/// The returned handle may be dropped to detach the listener; the thread
/// never finishes on its own.
pub fn spawn_listener<S>(config: ListenerConfig, sink: S) -> ListenerResult<thread::JoinHandle<()>>
where
    S: AttestationSink + 'static,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("gossip-listener-worker")
        .build()
        .map_err(|e| ListenerError::Runtime(e.to_string()))?;

    thread::Builder::new()
        .name(LISTENER_THREAD_NAME.to_string())
        .spawn(move || {
            let supervisor = Supervisor::new(config, GossipPipeline::new(sink));
            runtime.block_on(supervisor.run());
        })
        .map_err(|e| ListenerError::Runtime(e.to_string()))
}

/// Read a possibly-null C string, treating null as empty.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the returned lifetime.
unsafe fn read_c_str<'a>(ptr: *const c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::Borrowed("")
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

/// Register `f` to receive quorum attestations and start listening.
///
/// `network_id` names the overlay, `bootstrap_addrs` and `listen_addrs` are
/// comma-separated multiaddr lists. Null pointers are read as empty strings.
/// Returns immediately; the listener runs for the rest of the process.
///
/// # Safety
///
/// Each string argument must be null or a valid NUL-terminated string for
/// the duration of this call. `f` must be safe to call from any thread for
/// the lifetime of the process.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn RegisterObservationCallback(
    f: ObservationCallback,
    network_id: *const c_char,
    bootstrap_addrs: *const c_char,
    listen_addrs: *const c_char,
) {
    init_logging();

    let config = ListenerConfig::from_raw(
        &read_c_str(network_id),
        &read_c_str(bootstrap_addrs),
        &read_c_str(listen_addrs),
    );

    info!(
        network = %config.network_id,
        bootstrap_peers = config.bootstrap_peers.len(),
        listen_addrs = config.listen_addrs.len(),
        "Registering observation callback"
    );

    if let Err(e) = spawn_listener(config, ForeignCallback::new(f)) {
        error!(error = %e, "Failed to start gossip listener");
    }
}
