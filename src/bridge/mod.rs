//! Frame-side bridge to the host context.
//!
//! A [`Bridge`] owns one connection to the host over a [`MessagePort`]:
//!
//! ```text
//! Unconnected ──connect()──> Handshaking ──context──> Connected
//!      ^                          │
//!      └────────timeout───────────┘
//! ```
//!
//! Concurrent `connect()` callers share a single handshake. Once connected,
//! `query`/`mutate` send an intent and wait for the matching reply type,
//! bounded by the request timeout. Inbound host messages must be fed to
//! [`Bridge::handle_message`] (or via [`Bridge::listen`]); each is
//! republished verbatim on the bridge's [`EventHub`] under its full `type`
//! before settling any pending request.
//!
//! # Events
//!
//! | event          | payload              | when                          |
//! |----------------|----------------------|-------------------------------|
//! | `ready`        | `{address, network}` | handshake completed           |
//! | `tx:submitted` | `{}`                 | a mutate intent was sent      |
//! | `tx:success`   | `{txId}`             | mutation succeeded            |
//! | `tx:error`     | `{txId, message}`    | mutation refused              |
//! | `error`        | `{code, message}`    | any other failure             |
//! | `<ns>:<kind>`  | the raw message      | any inbound host message      |

mod pending;
pub mod protocol;
pub mod ready;

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channel::{ChannelError, MessagePort};
use crate::config::BridgeConfig;
use crate::events::{self, EventCallback, EventHub};

use pending::{PendingTable, Settlement};
pub use protocol::{
    Action, ErrorCode, MessageKind, Namespace, EVENT_ERROR, EVENT_READY, EVENT_TX_ERROR,
    EVENT_TX_SUBMITTED, EVENT_TX_SUCCESS,
};
use protocol::{
    Classified, ContextMessage, ErrorMessage, IntentMessage, MutateResultMessage,
    QueryResultMessage, TxStatus,
};
pub use ready::{ready_flag, AlreadyReady, ReadyFlag, ReadySignal, ReadyTrigger};

/// Errors surfaced by bridge operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// No reply arrived in time.
    #[error("Timed out waiting for {operation}")]
    Timeout {
        /// `connect`, `query` or `mutate`.
        operation: &'static str,
    },

    /// The host replied with an error message.
    #[error("Request rejected ({code}): {message}")]
    Rejected {
        /// Code reported by the host.
        code: ErrorCode,
        /// Message reported by the host.
        message: String,
    },

    /// The host reported a mutation with a non-success status.
    #[error("Transaction {tx_id} failed: {message}")]
    TransactionFailed {
        /// Transaction id (may be empty).
        tx_id: String,
        /// Failure reason.
        message: String,
    },

    /// Connected, but the host supplied no address.
    #[error("Bridge not initialized: no user address")]
    NotInitialized,

    /// A request spec or a reply had the wrong shape.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The handshake task went away without an outcome.
    #[error("Connection attempt abandoned")]
    ConnectionAbandoned,
}

impl BridgeError {
    /// Wire code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Rejected { code, .. } => *code,
            Self::TransactionFailed { .. } => ErrorCode::UnknownError,
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
            Self::ConnectionAbandoned => ErrorCode::ConnectionError,
        }
    }
}

/// What the host told us during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerContext {
    /// Connected account address (may be empty).
    pub address: String,
    /// Network name.
    pub network: String,
}

impl From<ContextMessage> for PeerContext {
    fn from(msg: ContextMessage) -> Self {
        Self {
            address: msg.address,
            network: msg.network,
        }
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handshake in progress.
    Unconnected,
    /// Waiting for readiness or for the host's context reply.
    Handshaking,
    /// Handshake complete.
    Connected(PeerContext),
}

type ConnectWaiter = oneshot::Sender<Result<(), BridgeError>>;

struct Session {
    state: ConnectionState,
    waiters: Vec<ConnectWaiter>,
}

struct Inner {
    config: BridgeConfig,
    namespace: Namespace,
    port: Arc<dyn MessagePort>,
    ready: Arc<dyn ReadySignal>,
    hub: EventHub,
    session: Mutex<Session>,
    pending: Arc<PendingTable>,
}

/// Frame-side endpoint of the bridge protocol. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("namespace", &self.inner.namespace)
            .field("state", &self.state())
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Bridge posting through `port`, with the document already ready.
    #[must_use]
    pub fn new(config: BridgeConfig, port: Arc<dyn MessagePort>) -> Self {
        Self::with_ready_signal(config, port, Arc::new(AlreadyReady))
    }

    /// Bridge whose handshake waits for `ready` first.
    #[must_use]
    pub fn with_ready_signal(
        config: BridgeConfig,
        port: Arc<dyn MessagePort>,
        ready: Arc<dyn ReadySignal>,
    ) -> Self {
        let namespace = Namespace::new(&config.namespace);
        Self {
            inner: Arc::new(Inner {
                config,
                namespace,
                port,
                ready,
                hub: EventHub::new(),
                session: Mutex::new(Session {
                    state: ConnectionState::Unconnected,
                    waiters: Vec::new(),
                }),
                pending: Arc::new(PendingTable::default()),
            }),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session().state.clone()
    }

    /// Whether the handshake has completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self.session().state, ConnectionState::Connected(_))
    }

    /// Host context, once connected.
    #[must_use]
    pub fn peer(&self) -> Option<PeerContext> {
        match &self.session().state {
            ConnectionState::Connected(peer) => Some(peer.clone()),
            _ => None,
        }
    }

    /// The namespace this bridge speaks.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.inner.namespace
    }

    /// Subscribe to a bridge event.
    pub fn on(&self, event: &str, callback: EventCallback) {
        self.inner.hub.subscribe(event, callback);
    }

    /// Remove a subscription made with [`Bridge::on`].
    pub fn off(&self, event: &str, callback: &EventCallback) {
        self.inner.hub.unsubscribe(event, callback);
    }

    /// Connect to the host, performing the handshake if needed.
    ///
    /// Returns immediately when already connected. Concurrent callers
    /// during a handshake all wait on that same handshake.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Timeout`] if no context arrives within the handshake
    /// timeout; the bridge is then back to `Unconnected` and a later call
    /// starts a fresh handshake.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let (rx, start) = {
            let mut session = self.session();
            let start = match session.state {
                ConnectionState::Connected(_) => return Ok(()),
                ConnectionState::Handshaking => false,
                ConnectionState::Unconnected => {
                    session.state = ConnectionState::Handshaking;
                    true
                }
            };
            let (tx, rx) = oneshot::channel();
            session.waiters.push(tx);
            (rx, start)
        };

        if start {
            let bridge = self.clone();
            tokio::spawn(async move { bridge.run_handshake().await });
        }

        rx.await.unwrap_or(Err(BridgeError::ConnectionAbandoned))
    }

    /// Connect if needed and return the host's account address.
    ///
    /// # Errors
    ///
    /// Connection errors, or [`BridgeError::NotInitialized`] if the host
    /// supplied an empty address.
    pub async fn get_user_address(&self) -> Result<String, BridgeError> {
        self.connect().await?;
        match self.peer() {
            Some(peer) if !peer.address.is_empty() => Ok(peer.address),
            _ => Err(BridgeError::NotInitialized),
        }
    }

    /// Send a read-only query and return the host's `result`.
    ///
    /// `spec` must serialize to a JSON object; its `network` field is set
    /// to the connected network.
    ///
    /// # Errors
    ///
    /// Connection errors, [`BridgeError::InvalidPayload`],
    /// [`BridgeError::Rejected`] or [`BridgeError::Timeout`].
    pub async fn query<S: Serialize + ?Sized>(&self, spec: &S) -> Result<Value, BridgeError> {
        self.connect().await?;
        let reply = self
            .request(Action::Query, spec, MessageKind::QueryResult)
            .await?;
        let QueryResultMessage { result } = serde_json::from_value(reply)
            .map_err(|e| self.report(BridgeError::InvalidPayload(e.to_string())))?;
        Ok(result)
    }

    /// Send a state-changing request and return the transaction id.
    ///
    /// Publishes `tx:submitted` once sent, then `tx:success` or `tx:error`.
    ///
    /// # Errors
    ///
    /// As [`Bridge::query`], plus [`BridgeError::TransactionFailed`] when
    /// the host reports a non-success status.
    pub async fn mutate<S: Serialize + ?Sized>(&self, spec: &S) -> Result<String, BridgeError> {
        self.connect().await?;
        let reply = self
            .request(Action::Mutate, spec, MessageKind::MutateResult)
            .await?;
        let result: MutateResultMessage = serde_json::from_value(reply)
            .map_err(|e| self.report(BridgeError::InvalidPayload(e.to_string())))?;

        if result.status == TxStatus::Success {
            log::info!("Transaction {} succeeded", result.tx_id);
            self.inner
                .hub
                .publish(EVENT_TX_SUCCESS, &json!({ "txId": result.tx_id }));
            return Ok(result.tx_id);
        }

        let message = result
            .message
            .unwrap_or_else(|| "Transaction failed".to_string());
        log::warn!("Transaction {} failed: {message}", result.tx_id);
        self.inner.hub.publish(
            EVENT_TX_ERROR,
            &json!({ "txId": result.tx_id, "message": message }),
        );
        Err(BridgeError::TransactionFailed {
            tx_id: result.tx_id,
            message,
        })
    }

    /// Dispatch one inbound message from the host.
    ///
    /// Messages outside this bridge's namespace are ignored. Known
    /// host-to-frame messages are republished under their `type` and then
    /// settle the first pending request expecting that type.
    pub fn handle_message(&self, message: &Value) {
        let Some(message_type) = message.get("type").and_then(Value::as_str) else {
            return;
        };

        let kind = match self.inner.namespace.classify(message_type) {
            Classified::Foreign => return,
            Classified::Unknown(suffix) => {
                log::warn!("Dropping unknown bridge message type '{suffix}'");
                return;
            }
            Classified::Known(kind) if !kind.is_host_to_frame() => {
                log::debug!("Ignoring frame-bound message '{message_type}'");
                return;
            }
            Classified::Known(kind) => kind,
        };

        log::debug!("Received {message_type}");
        if kind == MessageKind::Context {
            self.refresh_context(message);
        }
        self.inner.hub.publish(message_type, message);
        if let Some(id) = self.inner.pending.settle(message_type, message) {
            log::trace!("{message_type} settled request {id}");
        }
    }

    /// Spawn a task feeding `inbox` into [`Bridge::handle_message`].
    ///
    /// The task ends when the sending side of `inbox` is dropped.
    pub fn listen(&self, mut inbox: mpsc::UnboundedReceiver<Value>) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                bridge.handle_message(&message);
            }
            log::debug!("Bridge inbox closed");
        })
    }

    fn session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.inner.session.lock().expect("Bridge session mutex poisoned")
    }

    async fn run_handshake(&self) {
        self.inner.ready.wait().await;

        // Listen before sending so a fast reply is not missed.
        let context_type = self.inner.namespace.type_name(MessageKind::Context);
        let (tx, rx) = oneshot::channel::<PeerContext>();
        let slot = Mutex::new(Some(tx));
        let listener = events::callback(move |payload| {
            let context: ContextMessage = serde_json::from_value(payload.clone())?;
            if let Some(tx) = slot.lock().expect("handshake slot poisoned").take() {
                let _ = tx.send(context.into());
            }
            Ok(())
        });
        self.inner.hub.subscribe(&context_type, Arc::clone(&listener));

        self.send_handshake().await;

        let outcome = match tokio::time::timeout(self.inner.config.handshake_timeout, rx).await {
            Ok(Ok(peer)) => Ok(peer),
            Ok(Err(_)) => Err(BridgeError::ConnectionAbandoned),
            Err(_) => Err(BridgeError::Timeout {
                operation: "connect",
            }),
        };

        self.inner.hub.unsubscribe(&context_type, &listener);
        self.finish_handshake(outcome);
    }

    async fn send_handshake(&self) {
        match self.post(MessageKind::Handshake, &()) {
            Ok(()) => return,
            Err(ChannelError::NoCounterpart) => {
                log::debug!(
                    "No host yet, retrying handshake in {:?}",
                    self.inner.config.handshake_retry_delay
                );
            }
            Err(e) => {
                log::warn!("Failed to send handshake: {e}");
                return;
            }
        }

        tokio::time::sleep(self.inner.config.handshake_retry_delay).await;
        if let Err(e) = self.post(MessageKind::Handshake, &()) {
            log::warn!("Failed to send handshake after retry: {e}");
        }
    }

    fn finish_handshake(&self, outcome: Result<PeerContext, BridgeError>) {
        let waiters = {
            let mut session = self.session();
            session.state = match &outcome {
                Ok(peer) => ConnectionState::Connected(peer.clone()),
                Err(_) => ConnectionState::Unconnected,
            };
            std::mem::take(&mut session.waiters)
        };

        let result = match outcome {
            Ok(peer) => {
                log::info!("Connected to host on {} as {}", peer.network, peer.address);
                self.inner.hub.publish(
                    EVENT_READY,
                    &json!({ "address": peer.address, "network": peer.network }),
                );
                Ok(())
            }
            Err(e) => {
                log::warn!("Handshake failed: {e}");
                Err(self.report(e))
            }
        };

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    fn refresh_context(&self, message: &Value) {
        let mut session = self.session();
        if !matches!(session.state, ConnectionState::Connected(_)) {
            return;
        }
        match serde_json::from_value::<ContextMessage>(message.clone()) {
            Ok(context) => {
                log::debug!("Host context refreshed");
                session.state = ConnectionState::Connected(context.into());
            }
            Err(e) => log::warn!("Ignoring malformed context: {e}"),
        }
    }

    async fn request<S: Serialize + ?Sized>(
        &self,
        action: Action,
        spec: &S,
        reply_kind: MessageKind,
    ) -> Result<Value, BridgeError> {
        let network = self.peer().map(|peer| peer.network).unwrap_or_default();
        let payload = with_network(spec, &network).map_err(|e| self.report(e))?;

        let message = self
            .inner
            .namespace
            .encode(MessageKind::Intent, &IntentMessage { action, payload })
            .map_err(|e| self.report(BridgeError::InvalidPayload(e.to_string())))?;
        let correlation_id = message
            .get("id")
            .and_then(Value::as_str)
            .map_or_else(protocol::new_message_id, str::to_string);

        // Register before posting so the reply cannot overtake us.
        let mut handle = self.inner.pending.register(
            correlation_id,
            self.inner.namespace.type_name(reply_kind),
            self.inner.namespace.type_name(MessageKind::Error),
        );

        if let Err(e) = self.inner.port.post(message) {
            log::warn!("Failed to send {action:?} intent: {e}");
        }
        if action == Action::Mutate {
            self.inner.hub.publish(EVENT_TX_SUBMITTED, &json!({}));
        }

        let operation = match action {
            Action::Mutate => "mutate",
            Action::Query | Action::GetUserAddress => "query",
        };
        match tokio::time::timeout(self.inner.config.request_timeout, handle.wait()).await {
            Ok(Some(Settlement::Response(reply))) => Ok(reply),
            Ok(Some(Settlement::Error(reply))) => {
                let ErrorMessage { code, message } = serde_json::from_value(reply)
                    .unwrap_or(ErrorMessage {
                        code: ErrorCode::UnknownError,
                        message: String::new(),
                    });
                Err(self.report(BridgeError::Rejected { code, message }))
            }
            Ok(None) => Err(self.report(BridgeError::ConnectionAbandoned)),
            Err(_) => Err(self.report(BridgeError::Timeout { operation })),
        }
    }

    fn post<T: Serialize + ?Sized>(&self, kind: MessageKind, body: &T) -> Result<(), ChannelError> {
        match self.inner.namespace.encode(kind, body) {
            Ok(message) => self.inner.port.post(message),
            Err(e) => {
                log::warn!("Failed to encode {kind:?}: {e}");
                Ok(())
            }
        }
    }

    /// Publish `error` for `err` and hand it back.
    fn report(&self, err: BridgeError) -> BridgeError {
        let message = match &err {
            BridgeError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        };
        self.inner.hub.publish(
            EVENT_ERROR,
            &json!({ "code": err.code(), "message": message }),
        );
        err
    }
}

fn with_network<S: Serialize + ?Sized>(spec: &S, network: &str) -> Result<Value, BridgeError> {
    let mut value =
        serde_json::to_value(spec).map_err(|e| BridgeError::InvalidPayload(e.to_string()))?;
    let Value::Object(fields) = &mut value else {
        return Err(BridgeError::InvalidPayload(
            "request spec must be a JSON object".to_string(),
        ));
    };
    fields.insert("network".to_string(), Value::String(network.to_string()));
    Ok(value)
}
