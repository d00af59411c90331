//! In-process message channel.
//!
//! [`memory_pair`] returns two connected endpoints; whatever one side posts
//! arrives on the other side's `inbox`. A port can be detached to simulate
//! a frame that is not embedded in any host.

use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;

use super::{ChannelError, MessagePort};

/// Posting half of an in-process channel.
pub struct MemoryPort {
    peer: Mutex<Option<mpsc::UnboundedSender<Value>>>,
}

impl std::fmt::Debug for MemoryPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let peer = self.peer.lock().expect("MemoryPort mutex poisoned");
        f.debug_struct("MemoryPort")
            .field("attached", &peer.is_some())
            .field("closed", &peer.as_ref().is_some_and(mpsc::UnboundedSender::is_closed))
            .finish()
    }
}

impl MemoryPort {
    /// A port posting into `peer`.
    #[must_use]
    pub fn new(peer: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            peer: Mutex::new(Some(peer)),
        }
    }

    /// A port with no counterpart; every post fails with `NoCounterpart`.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            peer: Mutex::new(None),
        }
    }

    /// Attach (or replace) the counterpart.
    pub fn attach(&self, peer: mpsc::UnboundedSender<Value>) {
        *self.peer.lock().expect("MemoryPort mutex poisoned") = Some(peer);
    }

    /// Drop the counterpart.
    pub fn detach(&self) {
        *self.peer.lock().expect("MemoryPort mutex poisoned") = None;
    }
}

impl MessagePort for MemoryPort {
    fn post(&self, message: Value) -> Result<(), ChannelError> {
        let peer = self.peer.lock().expect("MemoryPort mutex poisoned");
        let Some(tx) = peer.as_ref() else {
            return Err(ChannelError::NoCounterpart);
        };
        tx.send(message).map_err(|_| ChannelError::Closed)
    }
}

/// One side of a [`memory_pair`].
#[derive(Debug)]
pub struct MemoryEndpoint {
    /// Posts to the other side.
    pub port: MemoryPort,
    /// Receives what the other side posts.
    pub inbox: mpsc::UnboundedReceiver<Value>,
}

/// Two connected endpoints (`frame`, `host`).
#[must_use]
pub fn memory_pair() -> (MemoryEndpoint, MemoryEndpoint) {
    let (to_host, host_inbox) = mpsc::unbounded_channel();
    let (to_frame, frame_inbox) = mpsc::unbounded_channel();
    (
        MemoryEndpoint {
            port: MemoryPort::new(to_host),
            inbox: frame_inbox,
        },
        MemoryEndpoint {
            port: MemoryPort::new(to_frame),
            inbox: host_inbox,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pair_delivers_both_ways() {
        let (frame, host) = memory_pair();
        let (frame_port, mut frame_inbox) = (frame.port, frame.inbox);
        let (host_port, mut host_inbox) = (host.port, host.inbox);

        frame_port.post(json!({"type": "rift:handshake"})).unwrap();
        host_port.post(json!({"type": "rift:context"})).unwrap();

        assert_eq!(host_inbox.try_recv().unwrap()["type"], "rift:handshake");
        assert_eq!(frame_inbox.try_recv().unwrap()["type"], "rift:context");
    }

    #[test]
    fn test_detached_port_has_no_counterpart() {
        let port = MemoryPort::detached();
        assert_eq!(port.post(json!({})), Err(ChannelError::NoCounterpart));
    }

    #[test]
    fn test_detach_then_attach() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let port = MemoryPort::new(tx.clone());
        port.detach();
        assert_eq!(port.post(json!({"n": 1})), Err(ChannelError::NoCounterpart));

        port.attach(tx);
        port.post(json!({"n": 2})).unwrap();
        assert_eq!(rx.try_recv().unwrap()["n"], 2);
    }

    #[test]
    fn test_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let port = MemoryPort::new(tx);
        assert_eq!(port.post(json!({})), Err(ChannelError::Closed));
    }
}
