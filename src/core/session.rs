// src/core/session.rs — Per-channel session controller
//
// One `ChannelSession` exists per relay channel. It absorbs transport
// lifecycle events, runs the readiness decision (approval / OTP challenge)
// and owns the request bridge. RPC message handling and response delivery
// live in `handler.rs`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::core::approval::{ApprovalGate, ApprovalRequest};
use crate::core::bridge::RequestBridge;
use crate::core::methods::MethodPolicy;
use crate::core::otp::generate_otp;
use crate::core::registry::PendingRequestRegistry;
use crate::core::types::{
    ControlMessage, Origin, OriginatorInfo, RelayEvent, RpcRequest, SessionState,
};
use crate::infra::config::SessionConfig;
use crate::infra::errors::ConnectError;
use crate::integrations::types::{Capabilities, ConnectOptions};

/// How a session is created: fresh pairing or a resumed persisted channel.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub channel_id: String,
    pub origin: Origin,
    /// True only for the first-ever handshake of this channel.
    pub initial_connection: bool,
    pub originator_info: Option<OriginatorInfo>,
    pub last_authorized: Option<DateTime<Utc>>,
}

impl SessionParams {
    pub fn new(channel_id: impl Into<String>, origin: Origin) -> Self {
        Self {
            channel_id: channel_id.into(),
            origin,
            initial_connection: false,
            originator_info: None,
            last_authorized: None,
        }
    }

    pub fn initial(mut self) -> Self {
        self.initial_connection = true;
        self
    }

    pub fn with_last_authorized(mut self, at: DateTime<Utc>) -> Self {
        self.last_authorized = Some(at);
        self
    }

    pub fn with_originator_info(mut self, info: OriginatorInfo) -> Self {
        self.originator_info = Some(info);
        self
    }
}

/// Mutable per-channel state. Never held across an await.
pub(crate) struct Inner {
    pub(crate) state: SessionState,
    pub(crate) originator_info: Option<OriginatorInfo>,
    pub(crate) initial_connection: bool,
    /// Transport reported a disconnect that was not an explicit pause.
    pub(crate) received_disconnect: bool,
    pub(crate) last_authorized: Option<DateTime<Utc>>,
    pub(crate) otps: Option<Vec<u8>>,
    pub(crate) authorized_sent: bool,
    pub(crate) is_resumed: bool,
    /// A readiness decision is running for this episode.
    pub(crate) deciding: bool,
    /// Request ids whose answer hands control back to the calling app.
    pub(crate) redirect: HashSet<String>,
    /// Request ids this session registered and has not answered yet.
    pub(crate) in_flight: HashSet<String>,
    pub(crate) bridge: Option<Arc<RequestBridge>>,
    watchdog: Option<JoinHandle<()>>,
}

impl Inner {
    fn cancel_watchdog(&mut self) {
        if let Some(handle) = self.watchdog.take() {
            handle.abort();
        }
    }

    /// Move to `next` unless the session is already terminated.
    pub(crate) fn transition(&mut self, next: SessionState) {
        if self.state != SessionState::Terminated {
            self.state = next;
        }
    }
}

/// Point-in-time view of a session, for diagnostics and UI observers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub channel_id: String,
    pub origin: Origin,
    pub state: SessionState,
    pub ready: bool,
    pub loading: bool,
    pub initial_connection: bool,
    pub received_disconnect: bool,
    pub last_authorized: Option<DateTime<Utc>>,
    pub otp_active: bool,
    pub authorized_sent: bool,
    pub redirects_pending: usize,
    pub approval_pending: bool,
    pub resumed: bool,
}

pub struct ChannelSession {
    pub(crate) channel_id: String,
    pub(crate) origin: Origin,
    /// `remote_origin_prefix + channel_id`; the key under which the host is approved.
    pub(crate) host: String,
    pub(crate) config: SessionConfig,
    pub(crate) policy: MethodPolicy,
    pub(crate) caps: Capabilities,
    pub(crate) registry: Arc<PendingRequestRegistry>,
    pub(crate) approvals: ApprovalGate,
    inner: Mutex<Inner>,
    loading: Arc<watch::Sender<bool>>,
    ready: watch::Sender<bool>,
}

impl ChannelSession {
    pub fn new(
        params: SessionParams,
        caps: Capabilities,
        registry: Arc<PendingRequestRegistry>,
        config: SessionConfig,
    ) -> Self {
        let host = format!("{}{}", config.remote_origin_prefix, params.channel_id);
        let (loading, _) = watch::channel(true);
        let (ready, _) = watch::channel(false);

        tracing::debug!(
            "ChannelSession::new id={} origin={} initial_connection={} last_authorized={:?}",
            params.channel_id,
            params.origin.as_str(),
            params.initial_connection,
            params.last_authorized
        );

        Self {
            approvals: ApprovalGate::new(&params.channel_id, caps.approvals.clone()),
            policy: MethodPolicy::from_config(&config),
            channel_id: params.channel_id,
            origin: params.origin,
            host,
            config,
            caps,
            registry,
            inner: Mutex::new(Inner {
                state: SessionState::Initializing,
                originator_info: params.originator_info,
                initial_connection: params.initial_connection,
                received_disconnect: false,
                last_authorized: params.last_authorized,
                otps: None,
                authorized_sent: false,
                is_resumed: false,
                deciding: false,
                redirect: HashSet::new(),
                in_flight: HashSet::new(),
                bridge: None,
                watchdog: None,
            }),
            loading: Arc::new(loading),
            ready,
        }
    }

    pub(crate) fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─── Observers ──────────────────────────────────────────────────────────

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == SessionState::Terminated
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    pub fn is_resumed(&self) -> bool {
        self.inner().is_resumed
    }

    pub fn is_initial_connection(&self) -> bool {
        self.inner().initial_connection
    }

    pub fn last_authorized(&self) -> Option<DateTime<Utc>> {
        self.inner().last_authorized
    }

    pub fn originator_info(&self) -> Option<OriginatorInfo> {
        self.inner().originator_info.clone()
    }

    pub fn otps(&self) -> Option<Vec<u8>> {
        self.inner().otps.clone()
    }

    pub fn is_redirect_pending(&self, request_id: &str) -> bool {
        self.inner().redirect.contains(request_id)
    }

    pub fn is_approval_pending(&self) -> bool {
        self.approvals.has_pending()
    }

    pub fn has_bridge(&self) -> bool {
        self.inner().bridge.is_some()
    }

    /// Loading changes; last write wins.
    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner();
        SessionSnapshot {
            channel_id: self.channel_id.clone(),
            origin: self.origin,
            state: inner.state,
            ready: self.is_ready(),
            loading: self.is_loading(),
            initial_connection: inner.initial_connection,
            received_disconnect: inner.received_disconnect,
            last_authorized: inner.last_authorized,
            otp_active: inner.otps.is_some(),
            authorized_sent: inner.authorized_sent,
            redirects_pending: inner.redirect.len(),
            approval_pending: self.approvals.has_pending(),
            resumed: inner.is_resumed,
        }
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.send_replace(loading);
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.send_replace(ready);
    }

    /// Suspend until the readiness gate has been passed for this episode.
    pub async fn wait_for_ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    // ─── Driving ────────────────────────────────────────────────────────────

    /// Drive the session from the relay's event stream until it ends or the
    /// channel is terminated. RPC messages and readiness decisions run on
    /// their own tasks, so a pending approval never holds back a disconnect
    /// or a terminate.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<RelayEvent>) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        RelayEvent::Message(message) if !message.is_terminate() => {
                            let session = self.clone();
                            in_flight.spawn(async move { session.on_message(message).await });
                        }
                        RelayEvent::ClientsReady(info) => {
                            let session = self.clone();
                            in_flight.spawn(async move {
                                session.handle(RelayEvent::ClientsReady(info)).await
                            });
                        }
                        other => self.handle(other).await,
                    }
                    if self.is_terminated() {
                        break;
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::warn!("Channel {} message task panicked: {}", self.channel_id, e);
                        }
                    }
                }
            }
        }

        if self.is_terminated() {
            in_flight.abort_all();
        }
        while in_flight.join_next().await.is_some() {}
        tracing::debug!("Channel {} event loop finished", self.channel_id);
    }

    /// Single entry point for relay events.
    pub async fn handle(&self, event: RelayEvent) {
        if self.is_terminated() {
            tracing::debug!("Channel {} terminated, ignoring {:?}", self.channel_id, event);
            return;
        }

        match event {
            RelayEvent::ClientsConnected => self.on_clients_connected(),
            RelayEvent::ClientsDisconnected => self.on_clients_disconnected(),
            RelayEvent::ClientsReady(info) => {
                if let Err(e) = self.on_clients_ready(info).await {
                    tracing::warn!("Channel {} readiness failed: {}", self.channel_id, e);
                }
            }
            RelayEvent::Message(message) => self.on_message(message).await,
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    pub async fn connect(&self, with_key_exchange: bool) -> Result<(), ConnectError> {
        tracing::debug!(
            "ChannelSession::connect() with_key_exchange={} id={}",
            with_key_exchange,
            self.channel_id
        );
        let options = ConnectOptions {
            channel_id: self.channel_id.clone(),
            with_key_exchange,
            wallet_version: self.config.wallet_version.clone(),
        };
        self.caps.transport.connect(&options).await?;
        {
            let mut inner = self.inner();
            inner.received_disconnect = false;
            if inner.state == SessionState::Initializing {
                inner.transition(SessionState::AwaitingPeer);
            }
        }
        self.set_loading(true);
        Ok(())
    }

    fn on_clients_connected(&self) {
        let ready = self.is_ready();
        {
            let mut inner = self.inner();
            inner.received_disconnect = false;
            if !ready {
                inner.transition(SessionState::AwaitingPeer);
            }

            // Peer joined the socket but may never announce readiness.
            inner.cancel_watchdog();
            let loading = self.loading.clone();
            let delay = self.config.watchdog();
            let channel_id = self.channel_id.clone();
            inner.watchdog = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if loading.send_replace(false) {
                    tracing::debug!("Channel {} never became ready, cleared loading", channel_id);
                }
            }));
        }
        self.set_loading(true);
    }

    fn on_clients_disconnected(&self) {
        let paused = self.caps.transport.is_paused();
        {
            let mut inner = self.inner();
            inner.cancel_watchdog();
            if !paused {
                inner.initial_connection = false;
                inner.otps = None;
            }
            inner.received_disconnect = true;
            inner.transition(if paused {
                SessionState::Paused
            } else {
                SessionState::AwaitingPeer
            });
        }
        self.set_loading(false);

        // An unexplained disconnect may be a hijack attempt; force re-approval.
        if !paused && self.origin != Origin::Deeplink {
            self.caps.hosts.disapprove(&self.channel_id);
        }
        self.set_ready(false);
        tracing::debug!(
            "Channel {} peer disconnected (transport paused={})",
            self.channel_id,
            paused
        );
    }

    pub(crate) async fn on_clients_ready(
        &self,
        info: Option<OriginatorInfo>,
    ) -> Result<(), ConnectError> {
        // Legacy peers never completed a freshness-aware handshake.
        let legacy = info.as_ref().map_or(true, |i| i.api_version.is_none());
        if legacy {
            self.approvals.discard("legacy peer announced readiness");
        }

        let Some(info) = info else {
            return Ok(());
        };

        self.inner().originator_info = Some(info.clone());
        self.caps
            .hosts
            .update_originator_info(&self.channel_id, &info);

        if self.is_ready() {
            return Ok(());
        }

        let initial_connection = {
            let mut inner = self.inner();
            // A second announcement while deciding only refreshes metadata.
            if inner.deciding {
                return Ok(());
            }
            inner.deciding = true;
            inner.transition(SessionState::PendingApproval);
            inner.initial_connection
        };

        let decided = self.decide_readiness(initial_connection).await;
        self.inner().deciding = false;
        if let Err(e) = decided {
            self.inner().transition(SessionState::AwaitingPeer);
            return Err(e);
        }

        self.setup_bridge(&info);
        {
            let mut inner = self.inner();
            // "ready" arrived; the connect watchdog no longer applies.
            inner.cancel_watchdog();
            if inner.state == SessionState::PendingApproval {
                inner.transition(SessionState::Ready);
            }
        }
        self.set_ready(true);
        tracing::info!("Channel {} ready", self.channel_id);
        Ok(())
    }

    async fn decide_readiness(&self, initial_connection: bool) -> Result<(), ConnectError> {
        match (initial_connection, self.origin) {
            (true, Origin::QrCode) => {
                self.check_permissions(None, self.last_authorized()).await?;
                self.send_authorized(true).await;
            }
            (false, Origin::QrCode) => {
                let last_authorized = self.last_authorized();
                if self.was_active_recently(last_authorized) {
                    self.approvals.clear();
                    // Prevent auto-approval after the wallet process restarted.
                    self.caps.hosts.disapprove(&self.channel_id);
                    self.check_permissions(None, last_authorized).await?;
                    self.send_authorized(true).await;
                } else {
                    self.approvals.discard("stale reconnection");
                    let answer = self.ensure_otps()?;
                    if let Err(e) = self
                        .send_control(ControlMessage::Otp { otp_answer: answer })
                        .await
                    {
                        tracing::warn!("Channel {} failed to send otp: {}", self.channel_id, e);
                    }
                    self.caps.hosts.disapprove(&self.channel_id);
                    self.check_permissions(None, None).await?;
                    self.send_authorized(true).await;
                    let mut inner = self.inner();
                    inner.last_authorized = Some(Utc::now());
                    inner.otps = None;
                }
            }
            (false, Origin::Deeplink) => {
                // Deeplink channels are approved on reconnection without a prompt.
                self.caps.hosts.approve(&self.host);
                if let Err(e) = self.send_control(ControlMessage::Authorized).await {
                    tracing::warn!(
                        "Channel {} failed to send 'authorized': {}",
                        self.channel_id,
                        e
                    );
                }
            }
            (true, Origin::Deeplink) => {
                self.check_permissions(None, None).await?;
                self.send_authorized(true).await;
            }
            (_, Origin::Other) => {
                // Gated per message by the permission check instead.
                tracing::debug!(
                    "Channel {} has no readiness branch for origin {}",
                    self.channel_id,
                    self.origin.as_str()
                );
            }
        }
        Ok(())
    }

    /// Generate the OTP sequence for this episode if needed; returns the answer.
    fn ensure_otps(&self) -> Result<u8, ConnectError> {
        let mut inner = self.inner();
        if inner.otps.is_none() {
            inner.otps = Some(generate_otp()?);
            tracing::debug!("Channel {} generated OTP sequence", self.channel_id);
        }
        inner
            .otps
            .as_ref()
            .and_then(|codes| codes.first().copied())
            .ok_or_else(|| ConnectError::Other(anyhow::anyhow!("empty OTP sequence")))
    }

    fn setup_bridge(&self, info: &OriginatorInfo) {
        let mut inner = self.inner();
        if inner.bridge.is_some() {
            return;
        }
        inner.bridge = Some(Arc::new(RequestBridge::new(
            &self.channel_id,
            &self.host,
            info,
            self.caps.wallet.clone(),
        )));
    }

    pub(crate) fn was_active_recently(&self, last_authorized: Option<DateTime<Utc>>) -> bool {
        let window = self.config.freshness_window();
        last_authorized.is_some_and(|at| {
            // A timestamp in the future counts as fresh.
            (Utc::now() - at)
                .to_std()
                .map(|elapsed| elapsed < window)
                .unwrap_or(true)
        })
    }

    /// Resolve whether this channel may be served, prompting the user if needed.
    ///
    /// Only an explicit `last_authorized` exempts a stale host from prompting.
    /// At most one prompt is outstanding per channel; concurrent callers
    /// attach to it.
    pub async fn check_permissions(
        &self,
        message: Option<&RpcRequest>,
        last_authorized: Option<DateTime<Utc>>,
    ) -> Result<(), ConnectError> {
        let recently_active = self.was_active_recently(last_authorized);
        let initial_connection = self.is_initial_connection();
        tracing::debug!(
            "Channel {} checkPermissions method={:?} initial_connection={} last_authorized={:?} recently_active={}",
            self.channel_id,
            message.map(|m| m.method.as_str()),
            initial_connection,
            last_authorized,
            recently_active
        );

        if self.caps.hosts.is_approved(&self.channel_id)
            && self.caps.wallet.selected_account().is_some()
        {
            return Ok(());
        }

        if let Some(ticket) = self.approvals.pending() {
            return self.approvals.resolve(ticket).await;
        }

        if !initial_connection && self.origin == Origin::Deeplink {
            self.caps.hosts.revalidate(&self.channel_id);
        }

        if recently_active {
            return Ok(());
        }

        let request = {
            let inner = self.inner();
            ApprovalRequest::connect_accounts(
                &self.channel_id,
                self.origin,
                !inner.initial_connection,
                inner.originator_info.as_ref(),
                inner.otps.clone().unwrap_or_default(),
            )
        };
        let ticket = self.approvals.submit(request);
        self.approvals.resolve(ticket).await?;

        // Start the freshly approved session from a clean grant.
        self.caps.hosts.revalidate(&self.channel_id);
        Ok(())
    }

    /// Send `authorized` once per episode unless `force` is set.
    pub async fn send_authorized(&self, force: bool) {
        if self.inner().authorized_sent && !force {
            return;
        }
        match self.send_control(ControlMessage::Authorized).await {
            Ok(()) => self.inner().authorized_sent = true,
            Err(e) => tracing::warn!(
                "Channel {} send_authorized() failed: {}",
                self.channel_id,
                e
            ),
        }
    }

    pub(crate) async fn send_control(&self, message: ControlMessage) -> Result<(), ConnectError> {
        self.caps
            .transport
            .send(&message.into())
            .await
            .map_err(|e| ConnectError::TransportSendFailure(e.to_string()))
    }

    pub fn pause(&self) {
        self.caps.transport.pause();
        self.inner().transition(SessionState::Paused);
    }

    pub fn resume(&self) {
        self.caps.transport.resume();
        let ready = self.is_ready();
        {
            let mut inner = self.inner();
            inner.is_resumed = true;
            inner.cancel_watchdog();
            inner.transition(if ready {
                SessionState::Ready
            } else {
                SessionState::AwaitingPeer
            });
        }
        self.set_loading(false);
    }

    pub async fn disconnect(&self, terminate: bool) {
        tracing::debug!(
            "ChannelSession::disconnect() id={} terminate={}",
            self.channel_id,
            terminate
        );
        if terminate {
            if let Err(e) = self.send_control(ControlMessage::Terminate).await {
                tracing::warn!("Channel {} failed to send terminate: {}", self.channel_id, e);
            }
        }
        self.caps.transport.disconnect();
    }

    /// Tear the channel down for good: revoke approval, disconnect, drop the bridge.
    pub async fn remove_connection(&self, terminate: bool) {
        tracing::info!("Removing channel {} (terminate={})", self.channel_id, terminate);
        let (bridge, abandoned) = {
            let mut inner = self.inner();
            inner.last_authorized = None;
            inner.authorized_sent = false;
            inner.cancel_watchdog();
            inner.redirect.clear();
            inner.state = SessionState::Terminated;
            (inner.bridge.take(), std::mem::take(&mut inner.in_flight))
        };
        self.set_ready(false);
        for id in abandoned {
            self.registry.remove(&id);
        }
        self.caps.hosts.disapprove(&self.channel_id);
        self.disconnect(terminate).await;
        if let Some(bridge) = bridge {
            bridge.on_disconnect();
        }
        self.set_loading(false);
    }

    /// The peer asked to end the channel; external teardown follows.
    pub(crate) fn on_terminate(&self) {
        tracing::info!("Channel {} terminated by peer", self.channel_id);
        {
            let mut inner = self.inner();
            inner.cancel_watchdog();
            inner.state = SessionState::Terminated;
        }
        (self.caps.on_terminate)(&self.channel_id);
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        self.inner().cancel_watchdog();
    }
}
