//! Outstanding request table.
//!
//! Replies carry no reliable correlation id, so a reply settles the
//! *first* registered request that expects its message type (either the
//! response type or the error type). Each request owns a
//! [`PendingHandle`]; dropping the handle (after settlement, timeout or
//! cancellation) removes the entry, so the table never holds stale
//! requests.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

/// How a pending request was settled.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Settlement {
    /// The expected response type arrived.
    Response(Value),
    /// The error type arrived.
    Error(Value),
}

struct PendingRequest {
    correlation_id: String,
    response_type: String,
    error_type: String,
    resolve: oneshot::Sender<Settlement>,
}

/// Ordered list of outstanding requests.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: Mutex<Vec<PendingRequest>>,
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("len", &self.len())
            .finish()
    }
}

impl PendingTable {
    /// Register a request expecting `response_type` (or `error_type`).
    pub(crate) fn register(
        self: &Arc<Self>,
        correlation_id: String,
        response_type: String,
        error_type: String,
    ) -> PendingHandle {
        let (resolve, rx) = oneshot::channel();
        let mut entries = self.entries.lock().expect("PendingTable mutex poisoned");
        entries.push(PendingRequest {
            correlation_id: correlation_id.clone(),
            response_type,
            error_type,
            resolve,
        });
        PendingHandle {
            table: Arc::clone(self),
            correlation_id,
            rx,
        }
    }

    /// Settle the first request expecting `message_type`.
    ///
    /// Returns the settled request's correlation id, or `None` if nothing
    /// was waiting for this type.
    pub(crate) fn settle(&self, message_type: &str, message: &Value) -> Option<String> {
        let request = {
            let mut entries = self.entries.lock().expect("PendingTable mutex poisoned");
            let index = entries.iter().position(|entry| {
                entry.response_type == message_type || entry.error_type == message_type
            })?;
            entries.remove(index)
        };

        let settlement = if request.response_type == message_type {
            Settlement::Response(message.clone())
        } else {
            Settlement::Error(message.clone())
        };
        if request.resolve.send(settlement).is_err() {
            log::debug!(
                "Request {} was abandoned before its reply arrived",
                request.correlation_id
            );
        }
        Some(request.correlation_id)
    }

    /// Number of outstanding requests.
    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("PendingTable mutex poisoned")
            .len()
    }

    fn remove(&self, correlation_id: &str) {
        let mut entries = self.entries.lock().expect("PendingTable mutex poisoned");
        entries.retain(|entry| entry.correlation_id != correlation_id);
    }
}

/// Receiving side of one pending request. Removes its entry on drop.
pub(crate) struct PendingHandle {
    table: Arc<PendingTable>,
    correlation_id: String,
    rx: oneshot::Receiver<Settlement>,
}

impl PendingHandle {
    /// Wait for settlement. `None` if the entry vanished without one.
    pub(crate) async fn wait(&mut self) -> Option<Settlement> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        self.table.remove(&self.correlation_id);
    }
}
