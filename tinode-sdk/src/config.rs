//! Connection and reconnect settings.

use std::time::Duration;

/// Default Tinode websocket endpoint.
pub const DEFAULT_URL: &str = "wss://api.tinode.co/v0/channels";
/// Tinode wire protocol version announced in `hi`.
pub const PROTOCOL_VERSION: &str = "0.22";
/// Websocket subprotocol Tinode servers accept.
pub const SUBPROTOCOL: &str = "tinode";

/// Configuration for one connection to a Tinode server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Websocket URL (`ws://` or `wss://`).
    pub url: String,
    /// API key sent as `X-Tinode-APIKey`, if the server requires one.
    pub api_key: Option<String>,
    /// Websocket subprotocol to request. `None` sends no protocol header.
    pub subprotocol: Option<String>,
    /// Skip TLS certificate verification (for self-signed certs).
    pub tls_insecure: bool,
    /// User agent announced in `hi`.
    pub user_agent: String,
    /// Language announced in `hi`.
    pub lang: String,
    /// Topic subscribed at the end of the handshake.
    pub topic: String,
    /// How long to wait for a successful login reply.
    pub auth_timeout: Duration,
    /// Minimum time an authenticated session must stay up to count as
    /// productive (and reset the backoff).
    pub listen_cycle: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            api_key: None,
            subprotocol: Some(SUBPROTOCOL.to_string()),
            tls_insecure: false,
            user_agent: format!("tinode-sdk/{}", env!("CARGO_PKG_VERSION")),
            lang: "en".to_string(),
            topic: "me".to_string(),
            auth_timeout: Duration::from_secs(30),
            listen_cycle: Duration::from_secs(1),
        }
    }
}

/// Configuration for automatic reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after a productive session, and the floor for all delays.
    pub min_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
    /// Random extra delay as a fraction of the grown delay (0 disables).
    pub jitter: f64,
    /// Stop instead of retrying when the server answers 401/403.
    pub fatal_auth_rejects: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
            jitter: 0.0,
            fatal_auth_rejects: false,
        }
    }
}
