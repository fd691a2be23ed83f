// src/core/methods.rs — RPC method classification

use std::collections::HashSet;

use crate::infra::config::SessionConfig;

pub const CONNECT_SIGN: &str = "metamask_connectSign";
pub const PERSONAL_SIGN: &str = "personal_sign";
pub const SEND_TRANSACTION: &str = "eth_sendTransaction";
pub const GET_PROVIDER_STATE: &str = "metamask_getProviderState";

/// Which methods hand control back to the calling app once answered, and
/// which of those need extra settle time first.
#[derive(Debug, Clone, Default)]
pub struct MethodPolicy {
    redirect: HashSet<String>,
    delay: HashSet<String>,
}

impl MethodPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            redirect: config.redirect_methods.iter().cloned().collect(),
            delay: config.delay_methods.iter().cloned().collect(),
        }
    }

    pub fn needs_redirect(&self, method: &str) -> bool {
        self.redirect.contains(method)
    }

    /// Legacy peers (no api version) expect a redirect after the provider-state request.
    pub fn needs_legacy_redirect(&self, method: &str, legacy_peer: bool) -> bool {
        legacy_peer && !self.needs_redirect(method) && method == GET_PROVIDER_STATE
    }

    pub fn needs_delay(&self, method: &str) -> bool {
        self.delay.contains(method)
    }
}
