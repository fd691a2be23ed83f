// src/core/bridge.rs — Per-session adapter onto the wallet's method dispatch

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::core::approval::UNKNOWN_PARAM;
use crate::core::types::{OriginatorInfo, RpcRequest};
use crate::infra::errors::ConnectError;
use crate::integrations::types::{DispatchContext, WalletBackend};

/// Forwards permitted requests to the wallet on behalf of one channel.
///
/// Bound to the peer metadata current when the session first became ready.
/// Once torn down it refuses further dispatches, including requests that
/// were already holding a reference when the channel was removed.
pub struct RequestBridge {
    context: DispatchContext,
    wallet: Arc<dyn WalletBackend>,
    closed: AtomicBool,
}

impl RequestBridge {
    pub fn new(
        channel_id: &str,
        host: &str,
        info: &OriginatorInfo,
        wallet: Arc<dyn WalletBackend>,
    ) -> Self {
        Self {
            context: DispatchContext {
                channel_id: channel_id.to_string(),
                host: host.to_string(),
                url: info.url.clone(),
                title: info.title.clone(),
                platform: info.platform.clone().unwrap_or_else(|| UNKNOWN_PARAM.into()),
            },
            wallet,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn dispatch(&self, request: RpcRequest) -> Result<Value, ConnectError> {
        if self.is_closed() {
            return Err(ConnectError::Backend {
                message: format!("channel {} was removed", self.context.channel_id),
            });
        }

        tracing::debug!(
            "Bridge {} dispatching {} (id={})",
            self.context.channel_id,
            request.method,
            request.id
        );
        self.wallet
            .dispatch(self.context.clone(), request)
            .await
            .map_err(|e| ConnectError::Backend {
                message: e.to_string(),
            })
    }

    pub fn on_disconnect(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Bridge {} torn down", self.context.channel_id);
        }
    }
}
