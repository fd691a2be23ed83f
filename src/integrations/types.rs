// src/integrations/types.rs — Capability traits the session is built on
//
// Everything the controller needs from the outside world (relay, approval
// prompts, host persistence, wallet, OS) is injected through these traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::approval::ApprovalRequest;
use crate::core::types::{OriginatorInfo, OutboundMessage, RpcRequest};

/// Parameters for joining a relay channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
    pub channel_id: String,
    pub with_key_exchange: bool,
    /// Announced to the peer as the wallet's version.
    pub wallet_version: String,
}

/// Bidirectional relay channel. Events arrive separately as `RelayEvent`s.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> anyhow::Result<()>;
    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()>;
    fn pause(&self);
    fn resume(&self);
    fn is_paused(&self) -> bool;
    fn disconnect(&self);
}

/// The wallet's approval prompt authority.
#[async_trait]
pub trait ApprovalAuthority: Send + Sync {
    /// Resolves `Ok` once the user approves, `Err` when they decline.
    async fn submit(&self, request: ApprovalRequest) -> anyhow::Result<()>;
    fn has_pending(&self, channel_id: &str) -> bool;
    fn reject(&self, channel_id: &str, reason: &str);
}

/// Persistence of previously approved channel hosts.
pub trait HostStore: Send + Sync {
    fn approve(&self, host: &str);
    fn is_approved(&self, channel_id: &str) -> bool;
    fn disapprove(&self, channel_id: &str);
    fn revalidate(&self, channel_id: &str);
    fn update_originator_info(&self, channel_id: &str, info: &OriginatorInfo);
}

/// Origin attached to a transaction submitted on behalf of the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOrigin {
    /// `remote_origin_prefix + url` when the peer announced a url.
    pub origin: Option<String>,
    pub device_confirmed_on: String,
}

/// What the bridge tells the wallet about the caller of a dispatched method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub channel_id: String,
    pub host: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub platform: String,
}

/// Narrow view of the wallet backend.
#[async_trait]
pub trait WalletBackend: Send + Sync {
    /// Suspends until the keychain is unlocked.
    async fn wait_for_unlock(&self);
    fn selected_account(&self) -> Option<String>;
    /// Returns the transaction hash.
    async fn submit_transaction(
        &self,
        transaction: Value,
        origin: TransactionOrigin,
    ) -> anyhow::Result<String>;
    async fn dispatch(&self, context: DispatchContext, request: RpcRequest) -> anyhow::Result<Value>;
}

/// OS-level "return to calling application".
pub trait ReturnToApp: Send + Sync {
    fn go_back(&self);
}

/// Invoked when the peer asks to terminate the channel.
pub type TerminateHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything injected into a `ChannelSession`.
#[derive(Clone)]
pub struct Capabilities {
    pub transport: Arc<dyn Transport>,
    pub approvals: Arc<dyn ApprovalAuthority>,
    pub hosts: Arc<dyn HostStore>,
    pub wallet: Arc<dyn WalletBackend>,
    pub return_to_app: Arc<dyn ReturnToApp>,
    pub on_terminate: TerminateHook,
}
