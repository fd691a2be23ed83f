// src/infra/errors.rs — Error types for the session controller

use thiserror::Error;

use crate::core::types::RpcError;

/// EIP-1193 "user rejected the request".
pub const USER_REJECTED_CODE: i64 = 4001;
/// JSON-RPC invalid params.
pub const INVALID_PARAMS_CODE: i64 = -32602;
/// JSON-RPC internal error.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

#[derive(Error, Debug)]
pub enum ConnectError {
    // Surfaced to the peer on the originating request id
    #[error("Approval rejected for channel '{channel_id}': {reason}")]
    ApprovalRejected { channel_id: String, reason: String },

    #[error("Invalid message format for '{method}'")]
    InvalidMessageFormat { method: String },

    #[error("Wallet backend error: {message}")]
    Backend { message: String },

    // Absorbed locally, logged only
    #[error("Transport send failed: {0}")]
    TransportSendFailure(String),

    #[error("Waiting for the pending request registry failed: {0}")]
    RegistryWaitFailure(String),

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConnectError {
    /// Map onto the JSON-RPC error object sent to the peer.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            ConnectError::ApprovalRejected { .. } => RpcError {
                code: USER_REJECTED_CODE,
                message: "User rejected the request.".into(),
                data: None,
            },
            ConnectError::InvalidMessageFormat { method } => RpcError {
                code: INVALID_PARAMS_CODE,
                message: format!("Invalid message format for '{method}'"),
                data: None,
            },
            ConnectError::Backend { message } => RpcError {
                code: INTERNAL_ERROR_CODE,
                message: message.clone(),
                data: None,
            },
            other => RpcError {
                code: INTERNAL_ERROR_CODE,
                message: other.to_string(),
                data: None,
            },
        }
    }
}
