//! Single entry point for embedded frames.
//!
//! [`Rift`] bundles one [`Bridge`] with the identifier codec and the
//! configuration they were built from, and hands out detectors and
//! embedders configured the same way.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bridge::{Bridge, BridgeError, PeerContext, ReadySignal};
use crate::channel::MessagePort;
use crate::config::Config;
use crate::detector::{Detector, DetectorError, Document, NodeId, Occurrence};
use crate::embed::{Embedder, ViewerHost};
use crate::events::EventCallback;
use crate::uri::UriCodec;

/// `connect/query/mutate/on/off` over one host connection.
#[derive(Debug, Clone)]
pub struct Rift {
    config: Config,
    codec: UriCodec,
    bridge: Bridge,
}

impl Rift {
    /// Facade posting through `port`, with the document already ready.
    #[must_use]
    pub fn new(config: Config, port: Arc<dyn MessagePort>) -> Self {
        let bridge = Bridge::new(config.bridge.clone(), port);
        Self::assemble(config, bridge)
    }

    /// Facade whose handshake waits for `ready`.
    #[must_use]
    pub fn with_ready_signal(
        config: Config,
        port: Arc<dyn MessagePort>,
        ready: Arc<dyn ReadySignal>,
    ) -> Self {
        let bridge = Bridge::with_ready_signal(config.bridge.clone(), port, ready);
        Self::assemble(config, bridge)
    }

    fn assemble(config: Config, bridge: Bridge) -> Self {
        Self {
            codec: UriCodec::new(config.uri.clone()),
            config,
            bridge,
        }
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The identifier codec.
    #[must_use]
    pub fn codec(&self) -> &UriCodec {
        &self.codec
    }

    /// The underlying bridge.
    #[must_use]
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// See [`Bridge::connect`].
    ///
    /// # Errors
    ///
    /// See [`Bridge::connect`].
    pub async fn connect(&self) -> Result<(), BridgeError> {
        self.bridge.connect().await
    }

    /// See [`Bridge::get_user_address`].
    ///
    /// # Errors
    ///
    /// See [`Bridge::get_user_address`].
    pub async fn get_user_address(&self) -> Result<String, BridgeError> {
        self.bridge.get_user_address().await
    }

    /// See [`Bridge::query`].
    ///
    /// # Errors
    ///
    /// See [`Bridge::query`].
    pub async fn query<S: Serialize + ?Sized>(&self, spec: &S) -> Result<Value, BridgeError> {
        self.bridge.query(spec).await
    }

    /// See [`Bridge::mutate`].
    ///
    /// # Errors
    ///
    /// See [`Bridge::mutate`].
    pub async fn mutate<S: Serialize + ?Sized>(&self, spec: &S) -> Result<String, BridgeError> {
        self.bridge.mutate(spec).await
    }

    /// Subscribe to an event.
    pub fn on(&self, event: &str, callback: EventCallback) {
        self.bridge.on(event, callback);
    }

    /// Unsubscribe from an event.
    pub fn off(&self, event: &str, callback: &EventCallback) {
        self.bridge.off(event, callback);
    }

    /// Host context, once connected.
    #[must_use]
    pub fn peer(&self) -> Option<PeerContext> {
        self.bridge.peer()
    }

    /// Feed inbound host messages from `inbox` to the bridge.
    pub fn listen(&self, inbox: mpsc::UnboundedReceiver<Value>) -> JoinHandle<()> {
        self.bridge.listen(inbox)
    }

    /// Resolve an identifier to its loadable address.
    #[must_use]
    pub fn resolve(&self, identifier: &str) -> String {
        self.codec.to_address(identifier)
    }

    /// A detector for this scheme under `root`.
    ///
    /// # Errors
    ///
    /// See [`Detector::new`].
    pub fn detector<F>(
        &self,
        document: Arc<Document>,
        root: NodeId,
        callback: F,
    ) -> Result<Detector, DetectorError>
    where
        F: Fn(&Occurrence) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Detector::new(
            document,
            root,
            &self.config.uri.scheme,
            self.config.detector.clone(),
            callback,
        )
    }

    /// An embedder resolving through this facade's codec.
    #[must_use]
    pub fn embedder(&self, host: Arc<dyn ViewerHost>) -> Embedder {
        Embedder::new(self.codec.clone(), self.config.embed.clone(), host)
    }
}
