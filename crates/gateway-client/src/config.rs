use std::time::Duration;

use {
    gatelink_protocol::{
        CONNECT_QUIET_PERIOD_MS, DEFAULT_REQUEST_TIMEOUT_MS, MIN_PROTOCOL_VERSION,
        PROTOCOL_VERSION, roles, scopes,
    },
    secrecy::Secret,
    serde::Deserialize,
};

/// Reconnection delay policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first reconnect, and the value restored after a
    /// successful handshake.
    pub initial_ms: u64,
    /// Growth factor applied after each consecutive failure.
    pub factor: f64,
    /// Upper bound for the delay.
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 800,
            factor: 1.7,
            max_ms: 15_000,
        }
    }
}

/// Settings for one gateway socket session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:18789`.
    pub url: String,

    /// Shared gateway token. A cached per-device token takes precedence.
    pub token: Option<Secret<String>>,

    pub client_id: String,
    pub client_version: String,
    pub platform: String,
    pub mode: String,
    pub instance_id: Option<String>,

    pub role: String,
    pub scopes: Vec<String>,

    pub min_protocol: u32,
    pub max_protocol: u32,

    pub user_agent: String,
    pub locale: String,

    /// Default deadline for `GatewayClient::call`.
    pub request_timeout_ms: u64,

    /// How long to wait for `connect.challenge` before connecting without
    /// a nonce.
    pub connect_quiet_period_ms: u64,

    pub backoff: BackoffConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let version = env!("CARGO_PKG_VERSION").to_string();
        Self {
            url: "ws://127.0.0.1:18789".into(),
            token: None,
            client_id: "gatelink".into(),
            user_agent: format!("gatelink/{version}"),
            client_version: version,
            platform: std::env::consts::OS.into(),
            mode: "cli".into(),
            instance_id: None,
            role: roles::OPERATOR.into(),
            scopes: vec![scopes::ADMIN.into()],
            min_protocol: MIN_PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            locale: "en".into(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_quiet_period_ms: CONNECT_QUIET_PERIOD_MS,
            backoff: BackoffConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_quiet_period(&self) -> Duration {
        Duration::from_millis(self.connect_quiet_period_ms)
    }
}
