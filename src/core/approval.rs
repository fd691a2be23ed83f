// src/core/approval.rs — At-most-one approval prompt per channel
//
// Wraps the wallet's approval authority. A submitted prompt is kept as a
// shared future so every concurrent permission check on the same channel
// attaches to the same outcome instead of raising a second prompt.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;

use crate::core::types::{Origin, OriginatorInfo};
use crate::infra::errors::ConnectError;
use crate::integrations::types::ApprovalAuthority;

/// Analytics tag identifying remote-connection requests.
pub const REQUEST_SOURCE_SDK_REMOTE: &str = "MetaMask-SDK-Remote-Conn";
/// Placeholder for metadata the peer did not provide.
pub const UNKNOWN_PARAM: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    ConnectAccounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalAnalytics {
    pub request_source: String,
    pub request_platform: String,
}

/// Page metadata shown in the approval prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub channel_id: String,
    pub reconnect: bool,
    pub origin: Origin,
    pub url: String,
    pub title: String,
    pub icon: String,
    /// Codes the user cross-checks against the dapp; empty unless stale reconnect.
    pub otps: Vec<u8>,
    pub api_version: Option<String>,
    pub analytics: ApprovalAnalytics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    /// Always the channel id; the authority keys pending prompts by it.
    pub id: String,
    pub origin: Origin,
    pub kind: ApprovalKind,
    pub hostname: String,
    pub page_meta: PageMeta,
}

impl ApprovalRequest {
    pub fn connect_accounts(
        channel_id: &str,
        origin: Origin,
        reconnect: bool,
        info: Option<&OriginatorInfo>,
        otps: Vec<u8>,
    ) -> Self {
        let title = info.and_then(|i| i.title.clone()).unwrap_or_default();
        Self {
            id: channel_id.to_string(),
            origin,
            kind: ApprovalKind::ConnectAccounts,
            hostname: title.clone(),
            page_meta: PageMeta {
                channel_id: channel_id.to_string(),
                reconnect,
                origin,
                url: info.and_then(|i| i.url.clone()).unwrap_or_default(),
                title,
                icon: info.and_then(|i| i.icon.clone()).unwrap_or_default(),
                otps,
                api_version: info.and_then(|i| i.api_version.clone()),
                analytics: ApprovalAnalytics {
                    request_source: REQUEST_SOURCE_SDK_REMOTE.into(),
                    request_platform: info
                        .and_then(|i| i.platform.clone())
                        .unwrap_or_else(|| UNKNOWN_PARAM.into()),
                },
            },
        }
    }
}

/// Outcome shared between all waiters; `Err` carries the rejection reason.
pub type PendingApproval = Shared<BoxFuture<'static, Result<(), String>>>;

/// Handle to the outstanding approval of one episode.
#[derive(Clone)]
pub struct ApprovalTicket {
    episode: u64,
    outcome: PendingApproval,
}

impl ApprovalTicket {
    pub fn episode(&self) -> u64 {
        self.episode
    }

    pub async fn wait(self) -> Result<(), String> {
        self.outcome.await
    }
}

struct GateState {
    pending: Option<ApprovalTicket>,
    next_episode: u64,
}

pub struct ApprovalGate {
    channel_id: String,
    authority: Arc<dyn ApprovalAuthority>,
    state: Mutex<GateState>,
}

impl ApprovalGate {
    pub fn new(channel_id: &str, authority: Arc<dyn ApprovalAuthority>) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            authority,
            state: Mutex::new(GateState {
                pending: None,
                next_episode: 1,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pending(&self) -> Option<ApprovalTicket> {
        self.state().pending.clone()
    }

    pub fn has_pending(&self) -> bool {
        self.state().pending.is_some()
    }

    /// Submit a prompt, or join the one already outstanding for this channel.
    pub fn submit(&self, request: ApprovalRequest) -> ApprovalTicket {
        let mut state = self.state();
        if let Some(existing) = &state.pending {
            tracing::debug!(
                "Approval for channel {} already pending (episode {}), joining",
                self.channel_id,
                existing.episode
            );
            return existing.clone();
        }

        let authority = self.authority.clone();
        let outcome = async move {
            authority
                .submit(request)
                .await
                .map_err(|e| e.to_string())
        }
        .boxed()
        .shared();

        let ticket = ApprovalTicket {
            episode: state.next_episode,
            outcome,
        };
        state.next_episode += 1;
        state.pending = Some(ticket.clone());
        tracing::info!(
            "Approval requested for channel {} (episode {})",
            self.channel_id,
            ticket.episode
        );
        ticket
    }

    /// Await a ticket and clear it, whatever the outcome.
    pub async fn resolve(&self, ticket: ApprovalTicket) -> Result<(), ConnectError> {
        let episode = ticket.episode;
        let outcome = ticket.wait().await;
        self.clear_episode(episode);
        outcome.map_err(|reason| ConnectError::ApprovalRejected {
            channel_id: self.channel_id.clone(),
            reason,
        })
    }

    /// Drop the reference to the pending prompt without touching the authority.
    pub fn clear(&self) {
        self.state().pending = None;
    }

    /// Clear only if the pending prompt still belongs to `episode`.
    pub fn clear_episode(&self, episode: u64) {
        let mut state = self.state();
        if state.pending.as_ref().map(|t| t.episode) == Some(episode) {
            state.pending = None;
        }
    }

    /// Reject any prompt the authority still shows for this channel, then clear.
    pub fn discard(&self, reason: &str) {
        if self.authority.has_pending(&self.channel_id) {
            tracing::info!(
                "Rejecting stale approval for channel {}: {}",
                self.channel_id,
                reason
            );
            self.authority.reject(&self.channel_id, reason);
        }
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Authority that resolves every prompt once `release` is notified.
    struct GatedAuthority {
        submitted: AtomicUsize,
        rejected: AtomicUsize,
        release: Notify,
        approve: bool,
    }

    impl GatedAuthority {
        fn new(approve: bool) -> Arc<Self> {
            Arc::new(Self {
                submitted: AtomicUsize::new(0),
                rejected: AtomicUsize::new(0),
                release: Notify::new(),
                approve,
            })
        }
    }

    #[async_trait]
    impl ApprovalAuthority for GatedAuthority {
        async fn submit(&self, _request: ApprovalRequest) -> anyhow::Result<()> {
            self.submitted.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            if self.approve {
                Ok(())
            } else {
                anyhow::bail!("User rejected the request.")
            }
        }

        fn has_pending(&self, _channel_id: &str) -> bool {
            self.submitted.load(Ordering::SeqCst) > 0
        }

        fn reject(&self, _channel_id: &str, _reason: &str) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request() -> ApprovalRequest {
        ApprovalRequest::connect_accounts("chan", Origin::QrCode, false, None, vec![])
    }

    #[tokio::test]
    async fn test_concurrent_submits_share_one_prompt() {
        let authority = GatedAuthority::new(true);
        let gate = Arc::new(ApprovalGate::new("chan", authority.clone()));

        let first = gate.submit(request());
        let second = gate.submit(request());
        assert_eq!(first.episode(), second.episode());

        let waiters = {
            let (g1, g2) = (gate.clone(), gate.clone());
            tokio::spawn(async move { tokio::join!(g1.resolve(first), g2.resolve(second)) })
        };
        while authority.submitted.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        authority.release.notify_one();

        let (a, b) = waiters.await.unwrap();
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(authority.submitted.load(Ordering::SeqCst), 1);
        assert!(!gate.has_pending());
    }

    #[tokio::test]
    async fn test_rejection_clears_pending() {
        let authority = GatedAuthority::new(false);
        let gate = ApprovalGate::new("chan", authority.clone());
        let ticket = gate.submit(request());
        authority.release.notify_one();

        let err = gate.resolve(ticket).await.unwrap_err();
        assert!(matches!(err, ConnectError::ApprovalRejected { .. }));
        assert!(!gate.has_pending());
    }

    #[test]
    fn test_clear_episode_ignores_newer_prompt() {
        let authority = GatedAuthority::new(true);
        let gate = ApprovalGate::new("chan", authority);
        let old = gate.submit(request()).episode();
        gate.clear();
        let newer = gate.submit(request()).episode();
        assert_ne!(old, newer);

        gate.clear_episode(old);
        assert!(gate.has_pending());
        gate.clear_episode(newer);
        assert!(!gate.has_pending());
    }

    #[test]
    fn test_discard_rejects_only_when_authority_has_prompt() {
        let authority = GatedAuthority::new(true);
        let gate = ApprovalGate::new("chan", authority.clone());
        gate.discard("legacy peer");
        assert_eq!(authority.rejected.load(Ordering::SeqCst), 0);

        authority.submitted.store(1, Ordering::SeqCst);
        gate.discard("legacy peer");
        assert_eq!(authority.rejected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_carries_page_metadata() {
        let info = OriginatorInfo {
            url: Some("https://dapp.example".into()),
            title: Some("Dapp".into()),
            platform: Some("web-desktop".into()),
            ..Default::default()
        };
        let req = ApprovalRequest::connect_accounts("c9", Origin::Deeplink, true, Some(&info), vec![12, 34, 56]);
        assert_eq!(req.id, "c9");
        assert_eq!(req.hostname, "Dapp");
        assert_eq!(req.page_meta.url, "https://dapp.example");
        assert_eq!(req.page_meta.icon, "");
        assert_eq!(req.page_meta.otps, vec![12, 34, 56]);
        assert_eq!(req.page_meta.analytics.request_platform, "web-desktop");
        assert!(req.page_meta.reconnect);
    }
}
