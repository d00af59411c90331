//! Document-readiness gate.
//!
//! The handshake is not sent until the embedding document has finished
//! loading. Whoever owns that knowledge implements [`ReadySignal`]; hosts
//! that are always ready use [`AlreadyReady`].

use async_trait::async_trait;
use tokio::sync::watch;

/// Resolves once the embedding document is ready.
#[async_trait]
pub trait ReadySignal: Send + Sync + std::fmt::Debug {
    /// Wait until ready. Returns immediately if already ready.
    async fn wait(&self);
}

/// A signal that is ready from the start.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlreadyReady;

#[async_trait]
impl ReadySignal for AlreadyReady {
    async fn wait(&self) {}
}

/// Sets the paired [`ReadyFlag`].
#[derive(Debug)]
pub struct ReadyTrigger {
    tx: watch::Sender<bool>,
}

impl ReadyTrigger {
    /// Mark the document ready, waking every waiter.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

/// A signal that becomes ready when its [`ReadyTrigger`] fires.
#[derive(Debug, Clone)]
pub struct ReadyFlag {
    rx: watch::Receiver<bool>,
}

impl ReadyFlag {
    /// Whether the trigger has fired.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Create a connected trigger/flag pair, initially not ready.
#[must_use]
pub fn ready_flag() -> (ReadyTrigger, ReadyFlag) {
    let (tx, rx) = watch::channel(false);
    (ReadyTrigger { tx }, ReadyFlag { rx })
}

#[async_trait]
impl ReadySignal for ReadyFlag {
    async fn wait(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|ready| *ready).await.is_err() {
            // Trigger dropped without firing; nothing will ever fire it now.
            log::warn!("Ready trigger dropped before firing, proceeding anyway");
        }
    }
}
