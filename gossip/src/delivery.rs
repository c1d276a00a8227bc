// Copyright (c) 2024 Botho Foundation

//! Handing attestations to the consumer.
//!
//! Inside the crate delivery goes through [`AttestationSink`]. Across the C
//! ABI the sink is a [`ForeignCallback`]: each payload is copied into a
//! [`DeliveryBuffer`] that lives exactly as long as the callback invocation,
//! and the consumer gets a pointer and a length into it. The consumer must
//! copy whatever it wants to keep before returning.

use std::{ffi::c_char, fmt};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::trace;

/// Attestation as seen by the C consumer (`observation_t`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    /// Start of the serialized VAA. Valid only during the callback.
    pub vaa: *const c_char,
    /// Length of the serialized VAA in bytes.
    pub vaa_len: usize,
}

/// Consumer callback registered through the C ABI.
pub type ObservationCallback = extern "C" fn(Observation);

/// Receiver of quorum attestation payloads.
pub trait AttestationSink: Send + Sync {
    /// Deliver one payload. Called once per forwarded attestation, one at a
    /// time per pipeline run.
    fn deliver(&self, payload: &[u8]);
}

impl<T: AttestationSink + ?Sized> AttestationSink for std::sync::Arc<T> {
    fn deliver(&self, payload: &[u8]) {
        (**self).deliver(payload)
    }
}

/// Owned copy of a payload for the duration of one callback.
pub struct DeliveryBuffer {
    bytes: Box<[u8]>,
}

impl DeliveryBuffer {
    /// Copy `payload` into a fresh allocation.
    pub fn copy_from(payload: &[u8]) -> Self {
        Self {
            bytes: payload.into(),
        }
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow the buffer as a C view. The view must not outlive `self`.
    pub fn as_observation(&self) -> Observation {
        Observation {
            vaa: self.bytes.as_ptr().cast::<c_char>(),
            vaa_len: self.bytes.len(),
        }
    }

    /// Hand the C view to `f`, releasing the copy as soon as `f` returns.
    pub fn lend<R>(self, f: impl FnOnce(Observation) -> R) -> R {
        f(self.as_observation())
    }
}

impl fmt::Debug for DeliveryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryBuffer")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Sink that forwards payloads to a registered C callback.
#[derive(Clone, Copy)]
pub struct ForeignCallback {
    callback: ObservationCallback,
}

impl ForeignCallback {
    /// Wrap a registered callback.
    pub fn new(callback: ObservationCallback) -> Self {
        Self { callback }
    }
}

impl fmt::Debug for ForeignCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignCallback")
            .field("callback", &(self.callback as *const ()))
            .finish()
    }
}

impl AttestationSink for ForeignCallback {
    fn deliver(&self, payload: &[u8]) {
        let buffer = DeliveryBuffer::copy_from(payload);
        let callback = self.callback;

        trace!(len = buffer.len(), "Invoking observation callback");

        // The callee may block for as long as it likes. On a multi-threaded
        // runtime move the worker's other tasks off this thread first.
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| buffer.lend(|view| callback(view)));
            }
            _ => buffer.lend(|view| callback(view)),
        }
    }
}
