// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::infra::errors::ConnectError;

/// Environment variable overriding the freshness window, in milliseconds.
pub const FRESHNESS_ENV_VAR: &str = "OTP_EXPIRATION_DURATION_IN_MS";

pub const HOUR_IN_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            ansi: true,
        }
    }
}

/// Host platform the wallet runs on. Only affects settle delays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPlatform {
    Ios,
    #[default]
    Android,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a completed approval exempts a reconnect from re-challenge.
    pub freshness_window_ms: u64,
    /// Auto-clear of `loading` when the peer connects but never announces ready.
    pub watchdog_ms: u64,
    /// Extra wait before returning to the calling app for `delay_methods`.
    pub post_response_delay_ms: u64,
    /// Settle delay after rewriting `metamask_connectSign` (iOS only).
    pub connect_sign_settle_ms: u64,
    pub platform: HostPlatform,
    pub remote_origin_prefix: String,
    pub redirect_methods: Vec<String>,
    pub delay_methods: Vec<String>,
    pub wallet_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            freshness_window_ms: HOUR_IN_MS,
            watchdog_ms: 3_000,
            post_response_delay_ms: 1_000,
            connect_sign_settle_ms: 500,
            platform: HostPlatform::default(),
            remote_origin_prefix: "MMSDKREMOTE::".into(),
            redirect_methods: default_redirect_methods(),
            delay_methods: default_delay_methods(),
            wallet_version: default_wallet_version(),
        }
    }
}

fn default_redirect_methods() -> Vec<String> {
    [
        "eth_requestAccounts",
        "eth_sendTransaction",
        "eth_signTransaction",
        "eth_sign",
        "personal_sign",
        "eth_signTypedData",
        "eth_signTypedData_v3",
        "eth_signTypedData_v4",
        "wallet_watchAsset",
        "wallet_addEthereumChain",
        "wallet_switchEthereumChain",
        "metamask_connectSign",
    ]
    .iter()
    .map(|m| m.to_string())
    .collect()
}

fn default_delay_methods() -> Vec<String> {
    vec!["eth_requestAccounts".into()]
}

fn default_wallet_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

impl SessionConfig {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn post_response_delay(&self) -> Duration {
        Duration::from_millis(self.post_response_delay_ms)
    }

    /// Settle delay for `connectSign`, or `None` when the platform needs none.
    pub fn connect_sign_settle(&self) -> Option<Duration> {
        match self.platform {
            HostPlatform::Ios if self.connect_sign_settle_ms > 0 => {
                Some(Duration::from_millis(self.connect_sign_settle_ms))
            }
            _ => None,
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConnectError> {
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConnectError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ConnectError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `OTP_EXPIRATION_DURATION_IN_MS` when it holds a positive integer.
    pub fn apply_env_overrides(&mut self) {
        if let Some(ms) = std::env::var(FRESHNESS_ENV_VAR)
            .ok()
            .and_then(|raw| parse_freshness_override(&raw))
        {
            self.session.freshness_window_ms = ms;
        }
    }

    fn validate(&self) -> Result<(), ConnectError> {
        if self.session.freshness_window_ms == 0 {
            return Err(ConnectError::Config(
                "session.freshness_window_ms must be greater than zero".into(),
            ));
        }
        if self.session.remote_origin_prefix.is_empty() {
            return Err(ConnectError::Config(
                "session.remote_origin_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn parse_freshness_override(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|ms| *ms > 0)
}
