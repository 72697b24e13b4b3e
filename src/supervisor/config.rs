//! Watcher configuration and input validation.

use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::connectors::HttpClientConfig;
use crate::events::Address;

const DEFAULT_URL: &str = "ws://127.0.0.1:8546";
const DEFAULT_NAMESPACE: &str = "ethereum";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("endpoint URL is empty")]
    EmptyUrl,

    #[error("invalid endpoint URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported endpoint scheme {0:?} (expected ws, wss, http or https)")]
    UnsupportedScheme(String),

    #[error("invalid address {0:?}")]
    InvalidAddress(String),
}

/// Options for one watcher instance, as supplied by the host.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// WebSocket or HTTP JSON-RPC endpoint. Trimmed before use.
    pub url: String,
    /// Address whose balance is tracked. Empty means none.
    pub address: Option<String>,
    /// Namespace stamped on every emitted record.
    pub namespace: String,
    /// Deadline for establishing the initial connection.
    pub connect_timeout: Duration,
    /// How long draining waits for sub-tasks before aborting them.
    pub shutdown_grace: Duration,
    /// Capacity of the header channel (watcher -> supervisor).
    pub header_buffer: usize,
    /// Capacity of the height channel (supervisor -> poller).
    pub height_buffer: usize,
    /// Settings for the HTTP binding.
    pub http: HttpClientConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            address: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            connect_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
            header_buffer: 1000,
            height_buffer: 1000,
            http: HttpClientConfig::default(),
        }
    }
}

/// Inputs that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub endpoint: Url,
    pub address: Option<Address>,
}

impl WatcherConfig {
    /// Creates a configuration for `url` with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Sets the address to watch.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Reads the configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            url: std::env::var("CHAIN_WATCHER_URL").unwrap_or(defaults.url),
            address: std::env::var("CHAIN_WATCHER_ADDRESS").ok(),
            namespace: std::env::var("CHAIN_WATCHER_NAMESPACE").unwrap_or(defaults.namespace),
            connect_timeout: secs("CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            shutdown_grace: secs("SHUTDOWN_GRACE_SECS", defaults.shutdown_grace),
            header_buffer: defaults.header_buffer,
            height_buffer: defaults.height_buffer,
            http: HttpClientConfig {
                poll_interval: secs("HTTP_POLL_INTERVAL_SECS", defaults.http.poll_interval),
                ..defaults.http
            },
        }
    }

    /// Trims and validates the endpoint and address.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }

        let endpoint = Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(endpoint.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(endpoint.scheme().to_string()));
        }
        if endpoint.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::InvalidUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            });
        }

        let address = match self.address.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<Address>()
                    .map_err(|_| ConfigError::InvalidAddress(raw.to_string()))?,
            ),
        };

        Ok(ValidatedConfig { endpoint, address })
    }
}
