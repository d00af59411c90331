//! Transport abstraction for the cross-context message channel.
//!
//! The bridge talks to exactly one counterpart context over an untyped,
//! best-effort channel carrying JSON objects. This module defines the
//! outbound seam ([`MessagePort`]) the bridge posts through; inbound
//! messages are handed to the bridge by whoever owns the receiving end
//! (see [`crate::bridge::Bridge::handle_message`] and
//! [`crate::bridge::Bridge::listen`]).
//!
//! # Architecture
//!
//! ```text
//! MessagePort (trait)
//!     │
//!     ├── MemoryPort        in-process pair, used by tests and the host responder
//!     │
//!     └── (embedder)        e.g. a window.postMessage shim in a wasm build
//! ```
//!
//! The channel may never deliver a reply, but it does not corrupt or
//! duplicate messages.

pub mod memory;

use serde_json::Value;
use thiserror::Error;

pub use memory::{memory_pair, MemoryEndpoint, MemoryPort};

/// Errors that can occur when posting to the counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// No counterpart context is attached (e.g. the frame is not embedded).
    #[error("No counterpart context attached")]
    NoCounterpart,
    /// The counterpart was attached but its receiving end is gone.
    #[error("Channel closed")]
    Closed,
}

/// Outbound half of the message channel.
///
/// `post` is fire-and-forget: success only means the message was handed
/// to the transport, not that the counterpart saw it.
pub trait MessagePort: Send + Sync + std::fmt::Debug {
    /// Post one message to the counterpart.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NoCounterpart`] if no counterpart is
    /// attached, or [`ChannelError::Closed`] if it has gone away.
    fn post(&self, message: Value) -> Result<(), ChannelError>;
}
