// tests/common/mod.rs — In-memory capability fakes shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{oneshot, watch, Notify};

use sdkconnect::core::approval::ApprovalRequest;
use sdkconnect::core::registry::PendingRequestRegistry;
use sdkconnect::core::session::{ChannelSession, SessionParams};
use sdkconnect::core::types::{
    ControlMessage, OriginatorInfo, OutboundMessage, RpcRequest, RpcResponse,
};
use sdkconnect::infra::config::SessionConfig;
use sdkconnect::integrations::types::{
    ApprovalAuthority, Capabilities, ConnectOptions, DispatchContext, HostStore, ReturnToApp,
    TransactionOrigin, Transport, WalletBackend,
};

pub const PREFIX: &str = "MMSDKREMOTE::";

// ---------- Transport ----------

#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub paused: AtomicBool,
    pub fail_sends: AtomicBool,
    pub connects: Mutex<Vec<ConnectOptions>>,
    pub disconnects: AtomicUsize,
    /// When set, `send` records the message and then parks until `release_sends`.
    pub hold_sends: AtomicBool,
    pub release_sends: Notify,
}

impl FakeTransport {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_paused_now(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn authorized_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, OutboundMessage::Control(ControlMessage::Authorized)))
            .count()
    }

    pub fn otp_answers(&self) -> Vec<u8> {
        self.sent()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Control(ControlMessage::Otp { otp_answer }) => Some(*otp_answer),
                _ => None,
            })
            .collect()
    }

    pub fn responses(&self) -> Vec<RpcResponse> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::Provider(envelope) => Some(envelope.data),
                _ => None,
            })
            .collect()
    }

    pub fn response_for(&self, id: &str) -> Option<RpcResponse> {
        self.responses().into_iter().find(|r| r.id.to_string() == id)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, options: &ConnectOptions) -> anyhow::Result<()> {
        self.connects.lock().unwrap().push(options.clone());
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        // Recorded even when failing so tests can see what was attempted.
        self.sent.lock().unwrap().push(message.clone());
        if self.hold_sends.load(Ordering::SeqCst) {
            self.release_sends.notified().await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            anyhow::bail!("socket closed");
        }
        Ok(())
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------- Approved hosts ----------

#[derive(Default)]
pub struct FakeHosts {
    pub approved: Mutex<HashSet<String>>,
    pub approvals: Mutex<Vec<String>>,
    pub disapprovals: Mutex<Vec<String>>,
    pub revalidations: AtomicUsize,
    pub originator_updates: Mutex<Vec<(String, OriginatorInfo)>>,
}

impl FakeHosts {
    pub fn grant(&self, channel_id: &str) {
        self.approved
            .lock()
            .unwrap()
            .insert(format!("{PREFIX}{channel_id}"));
    }

    pub fn disapproval_count(&self) -> usize {
        self.disapprovals.lock().unwrap().len()
    }
}

impl HostStore for FakeHosts {
    fn approve(&self, host: &str) {
        self.approvals.lock().unwrap().push(host.to_string());
        self.approved.lock().unwrap().insert(host.to_string());
    }

    fn is_approved(&self, channel_id: &str) -> bool {
        self.approved
            .lock()
            .unwrap()
            .contains(&format!("{PREFIX}{channel_id}"))
    }

    fn disapprove(&self, channel_id: &str) {
        self.disapprovals.lock().unwrap().push(channel_id.to_string());
        self.approved
            .lock()
            .unwrap()
            .remove(&format!("{PREFIX}{channel_id}"));
    }

    fn revalidate(&self, _channel_id: &str) {
        self.revalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn update_originator_info(&self, channel_id: &str, info: &OriginatorInfo) {
        self.originator_updates
            .lock()
            .unwrap()
            .push((channel_id.to_string(), info.clone()));
    }
}

// ---------- Approval authority ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMode {
    Approve,
    Reject,
    /// Prompts stay open until `decide` or `reject` is called.
    Manual,
}

pub struct FakeApprovals {
    pub mode: Mutex<ApprovalMode>,
    pub submitted: Mutex<Vec<ApprovalRequest>>,
    pub rejected: Mutex<Vec<(String, String)>>,
    open: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    /// Approving a prompt grants the host, as the wallet's approval flow does.
    hosts: Arc<FakeHosts>,
}

impl FakeApprovals {
    pub fn new(hosts: Arc<FakeHosts>) -> Self {
        Self {
            mode: Mutex::new(ApprovalMode::Approve),
            submitted: Mutex::new(Vec::new()),
            rejected: Mutex::new(Vec::new()),
            open: Mutex::new(HashMap::new()),
            hosts,
        }
    }

    pub fn set_mode(&self, mode: ApprovalMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn submission_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn last_submission(&self) -> Option<ApprovalRequest> {
        self.submitted.lock().unwrap().last().cloned()
    }

    pub fn is_open(&self, channel_id: &str) -> bool {
        self.open.lock().unwrap().contains_key(channel_id)
    }

    /// Resolve an open prompt. Returns false if none was open.
    pub fn decide(&self, channel_id: &str, approve: bool) -> bool {
        match self.open.lock().unwrap().remove(channel_id) {
            Some(tx) => tx.send(approve).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ApprovalAuthority for FakeApprovals {
    async fn submit(&self, request: ApprovalRequest) -> anyhow::Result<()> {
        let channel_id = request.id.clone();
        self.submitted.lock().unwrap().push(request);
        let mode = *self.mode.lock().unwrap();
        let approved = match mode {
            ApprovalMode::Approve => true,
            ApprovalMode::Reject => false,
            ApprovalMode::Manual => {
                let (tx, rx) = oneshot::channel();
                self.open.lock().unwrap().insert(channel_id.clone(), tx);
                rx.await.unwrap_or(false)
            }
        };
        if approved {
            self.hosts.grant(&channel_id);
            Ok(())
        } else {
            anyhow::bail!("User rejected the request.")
        }
    }

    fn has_pending(&self, channel_id: &str) -> bool {
        self.is_open(channel_id)
    }

    fn reject(&self, channel_id: &str, reason: &str) {
        self.rejected
            .lock()
            .unwrap()
            .push((channel_id.to_string(), reason.to_string()));
        self.decide(channel_id, false);
    }
}

// ---------- Wallet ----------

pub struct FakeWallet {
    pub selected: Mutex<Option<String>>,
    pub unlocked: watch::Sender<bool>,
    pub dispatched: Mutex<Vec<(DispatchContext, RpcRequest)>>,
    pub transactions: Mutex<Vec<(Value, TransactionOrigin)>>,
    pub transaction_result: Mutex<Result<String, String>>,
    /// When set, `dispatch` parks until `release` is notified.
    pub hold_dispatch: AtomicBool,
    pub release: Notify,
}

impl Default for FakeWallet {
    fn default() -> Self {
        let (unlocked, _) = watch::channel(true);
        Self {
            selected: Mutex::new(Some("0xAAA".into())),
            unlocked,
            dispatched: Mutex::new(Vec::new()),
            transactions: Mutex::new(Vec::new()),
            transaction_result: Mutex::new(Ok("0xhash".into())),
            hold_dispatch: AtomicBool::new(false),
            release: Notify::new(),
        }
    }
}

impl FakeWallet {
    pub fn dispatched_methods(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.method.clone())
            .collect()
    }
}

#[async_trait]
impl WalletBackend for FakeWallet {
    async fn wait_for_unlock(&self) {
        let mut rx = self.unlocked.subscribe();
        let _ = rx.wait_for(|unlocked| *unlocked).await;
    }

    fn selected_account(&self) -> Option<String> {
        self.selected.lock().unwrap().clone()
    }

    async fn submit_transaction(
        &self,
        transaction: Value,
        origin: TransactionOrigin,
    ) -> anyhow::Result<String> {
        self.transactions.lock().unwrap().push((transaction, origin));
        self.transaction_result
            .lock()
            .unwrap()
            .clone()
            .map_err(|e| anyhow::anyhow!(e))
    }

    async fn dispatch(&self, context: DispatchContext, request: RpcRequest) -> anyhow::Result<Value> {
        let method = request.method.clone();
        self.dispatched.lock().unwrap().push((context, request));
        if self.hold_dispatch.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        Ok(json!({ "handled": method }))
    }
}

// ---------- Return to app ----------

#[derive(Default)]
pub struct FakeReturnToApp {
    pub count: AtomicUsize,
}

impl FakeReturnToApp {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl ReturnToApp for FakeReturnToApp {
    fn go_back(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------- Harness ----------

pub struct Harness {
    pub session: Arc<ChannelSession>,
    pub transport: Arc<FakeTransport>,
    pub approvals: Arc<FakeApprovals>,
    pub hosts: Arc<FakeHosts>,
    pub wallet: Arc<FakeWallet>,
    pub back: Arc<FakeReturnToApp>,
    pub registry: Arc<PendingRequestRegistry>,
    pub terminated: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new(params: SessionParams) -> Self {
        Self::with_config(params, SessionConfig::default())
    }

    pub fn with_config(params: SessionParams, config: SessionConfig) -> Self {
        Self::with_registry(params, config, Arc::new(PendingRequestRegistry::new()))
    }

    pub fn with_registry(
        params: SessionParams,
        config: SessionConfig,
        registry: Arc<PendingRequestRegistry>,
    ) -> Self {
        let transport = Arc::new(FakeTransport::default());
        let hosts = Arc::new(FakeHosts::default());
        let approvals = Arc::new(FakeApprovals::new(hosts.clone()));
        let wallet = Arc::new(FakeWallet::default());
        let back = Arc::new(FakeReturnToApp::default());
        let terminated = Arc::new(Mutex::new(Vec::new()));

        let on_terminate = {
            let terminated = terminated.clone();
            Arc::new(move |channel_id: &str| {
                terminated.lock().unwrap().push(channel_id.to_string());
            })
        };

        let caps = Capabilities {
            transport: transport.clone(),
            approvals: approvals.clone(),
            hosts: hosts.clone(),
            wallet: wallet.clone(),
            return_to_app: back.clone(),
            on_terminate,
        };

        let session = Arc::new(ChannelSession::new(params, caps, registry.clone(), config));

        Self {
            session,
            transport,
            approvals,
            hosts,
            wallet,
            back,
            registry,
            terminated,
        }
    }
}

pub fn modern_info() -> OriginatorInfo {
    OriginatorInfo {
        url: Some("https://dapp.example".into()),
        title: Some("Example Dapp".into()),
        icon: None,
        platform: Some("web-desktop".into()),
        api_version: Some("0.2.0".into()),
    }
}

pub fn legacy_info() -> OriginatorInfo {
    OriginatorInfo {
        api_version: None,
        ..modern_info()
    }
}

/// Yield to spawned tasks until `cond` holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Let spawned tasks run for a while.
pub async fn settle() {
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
}
