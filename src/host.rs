//! Host-side responder for the bridge protocol.
//!
//! [`HostResponder`] answers the frame's handshake and intents on behalf of
//! a [`WalletProvider`], the capability that actually holds an account and
//! executes queries and state-changing operations.
//!
//! ```text
//! frame Bridge ──handshake──> HostResponder ──context──> frame Bridge
//!              ──intent─────>       │        ──queryResult / mutateResult / error──>
//!                                   ▼
//!                            WalletProvider
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bridge::protocol::{
    Action, Classified, ContextMessage, ErrorCode, ErrorMessage, MessageKind,
    MutateResultMessage, Namespace, QueryResultMessage, TxStatus,
};
use crate::channel::MessagePort;

// ─── Wallet capability ─────────────────────────────────────────────────────

/// Failures reported by a [`WalletProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// The user declined in the approval UI.
    #[error("User rejected the request")]
    UserRejected,

    /// No wallet is available to serve the request.
    #[error("Wallet unavailable: {0}")]
    Unavailable(String),

    /// The request payload was unusable.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

impl WalletError {
    /// Wire code reported to the frame.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UserRejected => ErrorCode::UserRejected,
            Self::Unavailable(_) => ErrorCode::WalletUnavailable,
            Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
            Self::Failed(_) => ErrorCode::UnknownError,
        }
    }
}

/// Account context plus the ability to execute requests.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Current `{address, network}`.
    async fn context(&self) -> Result<ContextMessage, WalletError>;

    /// Execute a read-only query.
    async fn query(&self, payload: &Value) -> Result<Value, WalletError>;

    /// Execute a state-changing operation, returning the transaction id.
    async fn mutate(&self, payload: &Value) -> Result<String, WalletError>;
}

// ─── Responder ─────────────────────────────────────────────────────────────

/// Answers one frame's bridge messages. Cheap to clone.
#[derive(Clone)]
pub struct HostResponder {
    namespace: Namespace,
    port: Arc<dyn MessagePort>,
    wallet: Arc<dyn WalletProvider>,
}

impl std::fmt::Debug for HostResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostResponder")
            .field("namespace", &self.namespace)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl HostResponder {
    /// Responder for namespace `namespace`, replying through `port`.
    #[must_use]
    pub fn new(
        namespace: &str,
        port: Arc<dyn MessagePort>,
        wallet: Arc<dyn WalletProvider>,
    ) -> Self {
        Self {
            namespace: Namespace::new(namespace),
            port,
            wallet,
        }
    }

    /// Handle one inbound message from the frame, replying if needed.
    pub async fn handle_message(&self, message: &Value) {
        let Some(message_type) = message.get("type").and_then(Value::as_str) else {
            return;
        };
        match self.namespace.classify(message_type) {
            Classified::Known(MessageKind::Handshake) => self.on_handshake().await,
            Classified::Known(MessageKind::Intent) => self.on_intent(message).await,
            Classified::Known(kind) => {
                log::debug!("Ignoring host-bound message {kind:?}");
            }
            Classified::Unknown(suffix) => {
                log::warn!("Dropping unknown bridge message type '{suffix}'");
            }
            Classified::Foreign => {}
        }
    }

    /// Spawn a task serving `inbox`; each message is handled on its own
    /// task so a slow approval does not hold up other requests.
    pub fn serve(&self, mut inbox: mpsc::UnboundedReceiver<Value>) -> JoinHandle<()> {
        let responder = self.clone();
        tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                let responder = responder.clone();
                tokio::spawn(async move { responder.handle_message(&message).await });
            }
            log::debug!("Host inbox closed");
        })
    }

    async fn on_handshake(&self) {
        log::info!("Frame handshake received");
        self.send_context().await;
    }

    async fn send_context(&self) {
        match self.wallet.context().await {
            Ok(context) => self.reply(MessageKind::Context, &context),
            Err(e) => self.reply_error(e.code(), &e.to_string()),
        }
    }

    async fn on_intent(&self, message: &Value) {
        let action = match message.get("action") {
            Some(raw) => match serde_json::from_value::<Action>(raw.clone()) {
                Ok(action) => action,
                Err(_) if raw.is_string() => {
                    log::warn!("Unsupported intent action {raw}");
                    self.reply_error(ErrorCode::NotSupported, &format!("Unsupported action {raw}"));
                    return;
                }
                Err(e) => {
                    self.reply_error(ErrorCode::InvalidPayload, &e.to_string());
                    return;
                }
            },
            None => {
                self.reply_error(ErrorCode::InvalidPayload, "Intent is missing 'action'");
                return;
            }
        };

        if action == Action::GetUserAddress {
            self.send_context().await;
            return;
        }

        let payload = message.get("payload").cloned().unwrap_or(Value::Null);
        if !payload.is_object() {
            self.reply_error(ErrorCode::InvalidPayload, "Intent payload must be an object");
            return;
        }

        match action {
            Action::Query => match self.wallet.query(&payload).await {
                Ok(result) => self.reply(MessageKind::QueryResult, &QueryResultMessage { result }),
                Err(e) => self.reply_error(e.code(), &e.to_string()),
            },
            Action::Mutate => match self.wallet.mutate(&payload).await {
                Ok(tx_id) => {
                    log::info!("Mutation submitted as {tx_id}");
                    self.reply(
                        MessageKind::MutateResult,
                        &MutateResultMessage {
                            status: TxStatus::Success,
                            tx_id,
                            message: None,
                        },
                    );
                }
                Err(WalletError::UserRejected) => {
                    log::info!("Mutation rejected by user");
                    self.reply(
                        MessageKind::MutateResult,
                        &MutateResultMessage {
                            status: TxStatus::Error,
                            tx_id: String::new(),
                            message: Some(WalletError::UserRejected.to_string()),
                        },
                    );
                }
                Err(e) => self.reply_error(e.code(), &e.to_string()),
            },
            Action::GetUserAddress => {}
        }
    }

    fn reply_error(&self, code: ErrorCode, message: &str) {
        self.reply(
            MessageKind::Error,
            &ErrorMessage {
                code,
                message: message.to_string(),
            },
        );
    }

    fn reply<T: Serialize + ?Sized>(&self, kind: MessageKind, body: &T) {
        let message = match self.namespace.encode(kind, body) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Failed to encode {kind:?} reply: {e}");
                return;
            }
        };
        if let Err(e) = self.port.post(message) {
            log::warn!("Failed to send {kind:?} reply: {e}");
        }
    }
}
