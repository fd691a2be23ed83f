// src/core/handler.rs — Inbound RPC handling and response delivery
//
// Every inbound RPC message is gated by the permission check before it is
// forwarded; every answer goes back through `send_message`, which also
// settles the pending-request registry and the return-to-app redirect.

use serde_json::Value;

use crate::core::methods::{CONNECT_SIGN, PERSONAL_SIGN, SEND_TRANSACTION};
use crate::core::session::ChannelSession;
use crate::core::types::{
    InboundMessage, Origin, OutboundMessage, RequestId, RpcRequest, RpcResponse, SessionState,
};
use crate::infra::errors::ConnectError;
use crate::integrations::types::TransactionOrigin;

/// Device tag recorded on transactions confirmed through a remote channel.
pub const DEVICE_CONFIRMED_ON: &str = "metamask_mobile";

impl ChannelSession {
    pub(crate) async fn on_message(&self, message: InboundMessage) {
        if message.is_terminate() {
            self.on_terminate();
            return;
        }

        // Only RPC methods are served.
        let Some(mut request) = message.into_request() else {
            return;
        };

        let legacy_peer = self
            .inner()
            .originator_info
            .as_ref()
            .map_or(true, |info| info.api_version.is_none());
        if self.policy.needs_redirect(&request.method)
            || self.policy.needs_legacy_redirect(&request.method, legacy_peer)
        {
            self.inner().redirect.insert(request.id.to_string());
        }

        self.caps.wallet.wait_for_unlock().await;
        self.set_loading(false);

        if let Err(e) = self.authorize_request(&request).await {
            tracing::warn!(
                "Channel {} refused {} (id={}): {}",
                self.channel_id,
                request.method,
                request.id,
                e
            );
            // A rejected prompt is cleared by its own episode; a newer one stays.
            self.respond(&request.id, Err(e)).await;
            return;
        }

        if let Err(e) = self.rewrite_request(&mut request).await {
            self.respond(&request.id, Err(e)).await;
            return;
        }

        let key = request.id.to_string();
        self.registry.add(&key, &request.method);
        self.inner().in_flight.insert(key);

        let id = request.id.clone();
        let outcome = if request.method == SEND_TRANSACTION {
            // Submitted directly: the generic bridge cannot carry the peer's origin.
            self.submit_transaction(request).await
        } else {
            let bridge = self.inner().bridge.clone();
            match bridge {
                Some(bridge) => bridge.dispatch(request).await,
                None => Err(ConnectError::Backend {
                    message: "request bridge not ready".into(),
                }),
            }
        };
        self.respond(&id, outcome).await;
    }

    /// Permission check, then wait for (or restore) readiness.
    async fn authorize_request(&self, request: &RpcRequest) -> Result<(), ConnectError> {
        self.check_permissions(Some(request), None).await?;

        let reconnected = {
            let mut inner = self.inner();
            std::mem::take(&mut inner.received_disconnect)
        };
        if reconnected {
            // The relay reconnected without a fresh ready handshake.
            self.set_ready(true);
            self.inner().transition(SessionState::Ready);
        } else {
            self.wait_for_ready().await;
            self.send_authorized(false).await;
        }
        Ok(())
    }

    /// `metamask_connectSign` becomes `personal_sign` signed by the selected account.
    async fn rewrite_request(&self, request: &mut RpcRequest) -> Result<(), ConnectError> {
        if request.method != CONNECT_SIGN {
            return Ok(());
        }

        let payload = request
            .non_empty_params()
            .map(|params| params[0].clone())
            .ok_or_else(|| ConnectError::InvalidMessageFormat {
                method: CONNECT_SIGN.into(),
            })?;
        let account = self
            .caps
            .wallet
            .selected_account()
            .map(Value::String)
            .unwrap_or(Value::Null);

        request.method = PERSONAL_SIGN.into();
        request.params = Some(Value::Array(vec![payload, account]));

        if let Some(settle) = self.config.connect_sign_settle() {
            tokio::time::sleep(settle).await;
        }
        tracing::debug!("Channel {} rewrote {} to {}", self.channel_id, CONNECT_SIGN, PERSONAL_SIGN);
        Ok(())
    }

    async fn submit_transaction(&self, request: RpcRequest) -> Result<Value, ConnectError> {
        let transaction = request
            .non_empty_params()
            .map(|params| params[0].clone())
            .ok_or_else(|| ConnectError::InvalidMessageFormat {
                method: SEND_TRANSACTION.into(),
            })?;

        let url = self
            .inner()
            .originator_info
            .as_ref()
            .and_then(|info| info.url.clone());
        let origin = TransactionOrigin {
            origin: url.map(|url| format!("{}{}", self.config.remote_origin_prefix, url)),
            device_confirmed_on: DEVICE_CONFIRMED_ON.into(),
        };

        let hash = self
            .caps
            .wallet
            .submit_transaction(transaction, origin)
            .await
            .map_err(|e| ConnectError::Backend {
                message: e.to_string(),
            })?;
        Ok(Value::String(hash))
    }

    async fn respond(&self, id: &RequestId, outcome: Result<Value, ConnectError>) {
        let response = match outcome {
            Ok(result) => RpcResponse::success(id.clone(), result),
            Err(e) => RpcResponse::failure(id.clone(), e.to_rpc_error()),
        };
        self.send_message(response.into()).await;
    }

    /// Transmit a message to the peer. Answers settle the registry and may
    /// hand control back to the calling app once nothing else is in flight.
    pub async fn send_message(&self, message: OutboundMessage) {
        let (needs_redirect, method) = match message.response_id() {
            Some(id) => {
                let key = id.to_string();
                let marked = {
                    let mut inner = self.inner();
                    inner.in_flight.remove(&key);
                    inner.redirect.remove(&key)
                };
                let method = self.registry.lookup(&key);
                if method.is_some() {
                    self.registry.remove(&key);
                }
                (marked, method)
            }
            None => (false, None),
        };

        if let Err(e) = self.caps.transport.send(&message).await {
            let err = ConnectError::TransportSendFailure(e.to_string());
            tracing::warn!("Channel {} send_message: {}", self.channel_id, err);
        }

        let Some(method) = method.filter(|_| needs_redirect) else {
            return;
        };

        // QR-paired dapps stay in the foreground.
        if self.origin == Origin::QrCode {
            return;
        }

        if let Err(e) = self.redirect_when_idle(&method).await {
            tracing::warn!(
                "Channel {} error while waiting for empty request queue: {}",
                self.channel_id,
                e
            );
            self.set_loading(false);
        }
    }

    async fn redirect_when_idle(&self, method: &str) -> Result<(), ConnectError> {
        self.registry.await_empty().await?;
        if self.policy.needs_delay(method) {
            tokio::time::sleep(self.config.post_response_delay()).await;
        }
        self.set_loading(false);
        self.caps.return_to_app.go_back();
        Ok(())
    }
}
