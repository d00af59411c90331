//! Rift - a message bridge between a host page and an embedded frame.
//!
//! Two mutually distrustful contexts exchange capability-gated requests
//! over a single untyped message channel. The frame connects with a
//! handshake, then issues queries and mutations the host executes on its
//! behalf.
//!
//! # Architecture
//!
//! - **URI codec** - maps `rift://` identifiers to loadable addresses
//! - **Event hub** - synchronous named-channel pub/sub with fault isolation
//! - **Bridge** - handshake, request correlation, timeouts, event fan-out
//! - **Detector** - finds identifiers in a live text tree
//!
//! # Modules
//!
//! - [`uri`] - identifier parsing and address resolution
//! - [`events`] - the event hub
//! - [`channel`] - the transport seam and an in-memory pair
//! - [`bridge`] - the frame-side protocol state machine
//! - [`host`] - the host-side responder
//! - [`detector`] - identifier discovery and the document model
//! - [`embed`] - viewer injection
//! - [`sdk`] - the `Rift` facade
//! - [`config`] - configuration loading

pub mod bridge;
pub mod channel;
pub mod detector;
pub mod embed;
pub mod events;
pub mod host;
pub mod sdk;
pub mod uri;

pub mod config;
pub mod constants;

// Re-export commonly used types
pub use bridge::{Bridge, BridgeError, ConnectionState, ErrorCode, PeerContext};
pub use config::Config;
pub use detector::{Detector, Document, Occurrence};
pub use embed::{Embedder, ViewerHost, ViewerOutcome};
pub use events::{EventCallback, EventHub};
pub use host::{HostResponder, WalletError, WalletProvider};
pub use sdk::Rift;
pub use uri::{ParsedIdentifier, UriCodec};
