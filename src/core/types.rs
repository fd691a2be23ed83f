// src/core/types.rs — Wire and session types shared across the controller

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope name used for every JSON-RPC response sent to the peer.
pub const PROVIDER_ENVELOPE_NAME: &str = "metamask-provider";
pub const JSONRPC_VERSION: &str = "2.0";

/// How the channel was paired. Selects the branch of the readiness decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    #[serde(rename = "qrcode")]
    QrCode,
    #[serde(rename = "deeplink")]
    Deeplink,
    #[serde(other)]
    Other,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::QrCode => "qrcode",
            Origin::Deeplink => "deeplink",
            Origin::Other => "other",
        }
    }
}

/// Metadata the remote peer announces about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginatorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Absent on legacy peers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// JSON-RPC request id. Peers send either strings or numbers; answers echo
/// the id in the shape it arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Text(String),
}

impl RequestId {
    fn is_empty(&self) -> bool {
        matches!(self, RequestId::Text(text) if text.is_empty())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::Text(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::Text(id)
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

/// A message received from the relay. Control messages carry `type`,
/// RPC messages carry `id` and `method`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl InboundMessage {
    pub fn rpc(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            kind: None,
            id: Some(id.into()),
            method: Some(method.into()),
            params: Some(params),
        }
    }

    pub fn terminate() -> Self {
        Self {
            kind: Some("terminate".into()),
            ..Default::default()
        }
    }

    pub fn is_terminate(&self) -> bool {
        self.kind.as_deref() == Some("terminate")
    }

    /// Convert into an RPC request; `None` when either `id` or `method` is missing.
    pub fn into_request(self) -> Option<RpcRequest> {
        match (self.id, self.method) {
            (Some(id), Some(method)) if !id.is_empty() && !method.is_empty() => Some(RpcRequest {
                id,
                method,
                params: self.params,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Params as a non-empty array, the shape every rewritten method requires.
    pub fn non_empty_params(&self) -> Option<&Vec<Value>> {
        match &self.params {
            Some(Value::Array(items)) if !items.is_empty() => Some(items),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: RequestId,
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            id: id.into(),
            jsonrpc: JSONRPC_VERSION.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<RequestId>, error: RpcError) -> Self {
        Self {
            id: id.into(),
            jsonrpc: JSONRPC_VERSION.into(),
            result: None,
            error: Some(error),
        }
    }
}

/// Session-level control messages sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Authorized,
    Otp {
        #[serde(rename = "otpAnswer")]
        otp_answer: u8,
    },
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEnvelope {
    pub name: String,
    pub data: RpcResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl ProviderEnvelope {
    pub fn new(data: RpcResponse) -> Self {
        Self {
            name: PROVIDER_ENVELOPE_NAME.into(),
            data,
            origin: None,
        }
    }
}

/// Anything the session transmits over the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Control(ControlMessage),
    Provider(ProviderEnvelope),
}

impl OutboundMessage {
    /// Request id this message answers, if it is a JSON-RPC response.
    pub fn response_id(&self) -> Option<&RequestId> {
        match self {
            OutboundMessage::Provider(envelope) => Some(&envelope.data.id),
            OutboundMessage::Control(_) => None,
        }
    }
}

impl From<ControlMessage> for OutboundMessage {
    fn from(msg: ControlMessage) -> Self {
        OutboundMessage::Control(msg)
    }
}

impl From<RpcResponse> for OutboundMessage {
    fn from(data: RpcResponse) -> Self {
        OutboundMessage::Provider(ProviderEnvelope::new(data))
    }
}

/// Events emitted by the relay transport for one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    ClientsConnected,
    ClientsDisconnected,
    ClientsReady(Option<OriginatorInfo>),
    Message(InboundMessage),
}

/// Lifecycle position of a channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    AwaitingPeer,
    PendingApproval,
    Ready,
    Paused,
    Terminated,
}
