//! Wire format for the bridge protocol.
//!
//! Every message is a JSON object with a namespaced `type` field. Outbound
//! messages additionally carry a freshly generated `id` (advisory only;
//! replies are matched by `type`, not by `id`).
//!
//! | direction  | `type`              | fields                                   |
//! |------------|---------------------|------------------------------------------|
//! | frame→host | `<ns>:handshake`    | (empty)                                  |
//! | frame→host | `<ns>:intent`       | `action`, `payload`                      |
//! | host→frame | `<ns>:context`      | `address`, `network`                     |
//! | host→frame | `<ns>:mutateResult` | `status` (`success`/`error`), `txId`     |
//! | host→frame | `<ns>:queryResult`  | `result`                                 |
//! | host→frame | `<ns>:error`        | `code`, `message`                        |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event published once the handshake completes: `{address, network}`.
pub const EVENT_READY: &str = "ready";
/// Event published right after a `mutate` intent is sent: `{}`.
pub const EVENT_TX_SUBMITTED: &str = "tx:submitted";
/// Event published when a mutation succeeds: `{txId}`.
pub const EVENT_TX_SUCCESS: &str = "tx:success";
/// Event published when a mutation is refused: `{txId, message}`.
pub const EVENT_TX_ERROR: &str = "tx:error";
/// Event published on every request/handshake failure: `{code, message}`.
pub const EVENT_ERROR: &str = "error";

/// Stable error codes shared with the counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The user declined the request in the host's approval UI.
    UserRejected,
    /// The host has no wallet to serve the request.
    WalletUnavailable,
    /// No reply arrived before the deadline.
    Timeout,
    /// The request or reply did not have the expected shape.
    InvalidPayload,
    /// The channel to the counterpart failed.
    ConnectionError,
    /// Used before the handshake supplied a context.
    NotInitialized,
    /// The host does not implement the requested action.
    NotSupported,
    /// Anything else, including codes this side does not recognize.
    #[serde(other)]
    UnknownError,
}

impl ErrorCode {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserRejected => "user_rejected",
            Self::WalletUnavailable => "wallet_unavailable",
            Self::Timeout => "timeout",
            Self::InvalidPayload => "invalid_payload",
            Self::ConnectionError => "connection_error",
            Self::NotInitialized => "not_initialized",
            Self::UnknownError => "unknown_error",
            Self::NotSupported => "not_supported",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message types, without the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// frame→host: announce presence, ask for context.
    Handshake,
    /// frame→host: a query/mutate/getUserAddress request.
    Intent,
    /// host→frame: `{address, network}`.
    Context,
    /// host→frame: outcome of a mutation.
    MutateResult,
    /// host→frame: outcome of a query.
    QueryResult,
    /// host→frame: a refused or failed request.
    Error,
}

impl MessageKind {
    const ALL: [Self; 6] = [
        Self::Handshake,
        Self::Intent,
        Self::Context,
        Self::MutateResult,
        Self::QueryResult,
        Self::Error,
    ];

    /// The part of `type` after `<ns>:`.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Intent => "intent",
            Self::Context => "context",
            Self::MutateResult => "mutateResult",
            Self::QueryResult => "queryResult",
            Self::Error => "error",
        }
    }

    /// Look a suffix up.
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.suffix() == suffix)
    }

    /// `true` for kinds the host sends to the frame.
    #[must_use]
    pub const fn is_host_to_frame(self) -> bool {
        matches!(
            self,
            Self::Context | Self::MutateResult | Self::QueryResult | Self::Error
        )
    }
}

/// Result of matching a `type` string against a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified<'a> {
    /// Not ours: unrelated channel traffic.
    Foreign,
    /// Ours, but an unknown suffix.
    Unknown(&'a str),
    /// A known message kind.
    Known(MessageKind),
}

/// Builds and recognizes namespaced message types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    /// Namespace `name` (messages are typed `name:<kind>`).
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            prefix: format!("{name}:"),
        }
    }

    /// Full `type` for `kind`, e.g. `rift:queryResult`.
    #[must_use]
    pub fn type_name(&self, kind: MessageKind) -> String {
        format!("{}{}", self.prefix, kind.suffix())
    }

    /// Classify an inbound `type` string.
    #[must_use]
    pub fn classify<'a>(&self, message_type: &'a str) -> Classified<'a> {
        match message_type.strip_prefix(self.prefix.as_str()) {
            None => Classified::Foreign,
            Some(suffix) => match MessageKind::from_suffix(suffix) {
                Some(kind) => Classified::Known(kind),
                None => Classified::Unknown(suffix),
            },
        }
    }

    /// Serialize `body` as a `kind` message stamped with a fresh `id`.
    ///
    /// `body` must serialize to an object (or unit/`null` for no fields).
    pub fn encode<T: Serialize + ?Sized>(
        &self,
        kind: MessageKind,
        body: &T,
    ) -> Result<Value, serde_json::Error> {
        let mut fields = match serde_json::to_value(body)? {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                return Err(serde::ser::Error::custom(format!(
                    "message body must be an object, got {other}"
                )))
            }
        };
        fields.insert("type".to_string(), Value::String(self.type_name(kind)));
        fields.insert("id".to_string(), Value::String(new_message_id()));
        Ok(Value::Object(fields))
    }
}

/// Fresh unique message identifier.
#[must_use]
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Requested operation in an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Re-send the connection context.
    GetUserAddress,
    /// Read-only query.
    Query,
    /// State-changing operation.
    Mutate,
}

/// Body of `<ns>:intent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentMessage {
    /// What to do.
    pub action: Action,
    /// Caller spec, with `network` asserted by the bridge.
    #[serde(default)]
    pub payload: Value,
}

/// Body of `<ns>:context`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    /// Connected account address.
    pub address: String,
    /// Network the host is connected to.
    pub network: String,
}

/// `status` of a mutate result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Submitted successfully.
    Success,
    /// Refused or failed.
    Error,
    /// Any other value; treated like `Error`.
    #[serde(other)]
    Unknown,
}

/// Body of `<ns>:mutateResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutateResultMessage {
    /// Outcome.
    pub status: TxStatus,
    /// Transaction identifier (may be empty on error).
    #[serde(rename = "txId", default)]
    pub tx_id: String,
    /// Optional human-readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of `<ns>:queryResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResultMessage {
    /// Arbitrary result payload.
    #[serde(default)]
    pub result: Value,
}

/// Body of `<ns>:error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code; unknown codes decode as `unknown_error`.
    #[serde(default = "unknown_code")]
    pub code: ErrorCode,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

fn unknown_code() -> ErrorCode {
    ErrorCode::UnknownError
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_names() {
        let ns = Namespace::new("rift");
        assert_eq!(ns.type_name(MessageKind::Handshake), "rift:handshake");
        assert_eq!(ns.type_name(MessageKind::MutateResult), "rift:mutateResult");
        assert_eq!(ns.type_name(MessageKind::QueryResult), "rift:queryResult");
    }

    #[test]
    fn test_classify() {
        let ns = Namespace::new("rift");
        assert_eq!(ns.classify("rift:context"), Classified::Known(MessageKind::Context));
        assert_eq!(ns.classify("rift:bogus"), Classified::Unknown("bogus"));
        assert_eq!(ns.classify("other:context"), Classified::Foreign);
        assert_eq!(ns.classify("riftcontext"), Classified::Foreign);
        assert_eq!(ns.classify("webpackOk"), Classified::Foreign);
    }

    #[test]
    fn test_direction() {
        assert!(!MessageKind::Handshake.is_host_to_frame());
        assert!(!MessageKind::Intent.is_host_to_frame());
        assert!(MessageKind::Context.is_host_to_frame());
        assert!(MessageKind::Error.is_host_to_frame());
    }

    #[test]
    fn test_encode_handshake_has_type_and_id() {
        let ns = Namespace::new("rift");
        let msg = ns.encode(MessageKind::Handshake, &()).unwrap();
        assert_eq!(msg["type"], "rift:handshake");
        assert!(msg["id"].as_str().is_some_and(|id| !id.is_empty()));
        assert_eq!(msg.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_encode_stamps_fresh_ids() {
        let ns = Namespace::new("rift");
        let a = ns.encode(MessageKind::Handshake, &()).unwrap();
        let b = ns.encode(MessageKind::Handshake, &()).unwrap();
        assert_ne!(a["id"], b["id"]);
    }

    #[test]
    fn test_encode_intent() {
        let ns = Namespace::new("rift");
        let msg = ns
            .encode(
                MessageKind::Intent,
                &IntentMessage {
                    action: Action::GetUserAddress,
                    payload: json!({"network": "main"}),
                },
            )
            .unwrap();
        assert_eq!(msg["type"], "rift:intent");
        assert_eq!(msg["action"], "getUserAddress");
        assert_eq!(msg["payload"]["network"], "main");
    }

    #[test]
    fn test_encode_rejects_non_object_body() {
        let ns = Namespace::new("rift");
        assert!(ns.encode(MessageKind::Intent, &42).is_err());
    }

    #[test]
    fn test_error_code_wire_names() {
        assert_eq!(json!(ErrorCode::UserRejected), json!("user_rejected"));
        assert_eq!(json!(ErrorCode::NotSupported), json!("not_supported"));
        let parsed: ErrorCode = serde_json::from_value(json!("wallet_unavailable")).unwrap();
        assert_eq!(parsed, ErrorCode::WalletUnavailable);
        let unknown: ErrorCode = serde_json::from_value(json!("quota_exceeded")).unwrap();
        assert_eq!(unknown, ErrorCode::UnknownError);
        assert_eq!(ErrorCode::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_error_code_serde_matches_as_str() {
        for code in [
            ErrorCode::UserRejected,
            ErrorCode::WalletUnavailable,
            ErrorCode::Timeout,
            ErrorCode::InvalidPayload,
            ErrorCode::ConnectionError,
            ErrorCode::NotInitialized,
            ErrorCode::NotSupported,
            ErrorCode::UnknownError,
        ] {
            assert_eq!(json!(code), json!(code.as_str()));
            let parsed: ErrorCode = serde_json::from_value(json!(code.as_str())).unwrap();
            assert_eq!(parsed, code);
        }
    }

    #[test]
    fn test_mutate_result_decoding() {
        let ok: MutateResultMessage =
            serde_json::from_value(json!({"type": "rift:mutateResult", "status": "success", "txId": "abc"}))
                .unwrap();
        assert_eq!(ok.status, TxStatus::Success);
        assert_eq!(ok.tx_id, "abc");

        let odd: MutateResultMessage =
            serde_json::from_value(json!({"status": "pending"})).unwrap();
        assert_eq!(odd.status, TxStatus::Unknown);
        assert_eq!(odd.tx_id, "");
    }

    #[test]
    fn test_error_message_defaults() {
        let msg: ErrorMessage = serde_json::from_value(json!({"type": "rift:error"})).unwrap();
        assert_eq!(msg.code, ErrorCode::UnknownError);
        assert_eq!(msg.message, "");
    }
}
