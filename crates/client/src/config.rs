//! Connector configuration.
//!
//! Defaults match the backend's stock deployment; every value can be
//! overridden through the environment (see `ClientConfig::from_env`).

use std::time::Duration;

use thiserror::Error;
use uce_shared::TimeoutClass;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8766";
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_LONG_REQUEST_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid WebSocket URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },
}

/// How replies are matched to the calls waiting on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorrelationMode {
    /// Match by reply `type` inferred from the command's action. At most one
    /// call per reply type can be outstanding; a newer call displaces an
    /// older one, which then only settles through its own timeout.
    #[default]
    ReplyType,
    /// Attach a monotonically increasing `request_id` to every command and
    /// match the id echoed back by the peer.
    RequestId,
}

impl CorrelationMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reply_type" | "type" => Some(CorrelationMode::ReplyType),
            "request_id" | "id" => Some(CorrelationMode::RequestId),
            _ => None,
        }
    }
}

/// Reconnection backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt; doubles on every subsequent attempt
    pub base_delay: Duration,
    /// Attempts before entering the terminal `Failed` state
    pub max_attempts: u32,
    /// Jitter factor (0.0-1.0) applied around each delay. Zero keeps retries
    /// fully deterministic.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            jitter_factor: 0.0,
        }
    }
}

/// Default request timeouts per timeout class.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutConfig {
    pub standard: Duration,
    pub long: Duration,
}

impl TimeoutConfig {
    pub fn for_class(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Standard => self.standard,
            TimeoutClass::Long => self.long,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            standard: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            long: Duration::from_millis(DEFAULT_LONG_REQUEST_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub url: String,
    pub reconnect: ReconnectConfig,
    pub timeouts: TimeoutConfig,
    pub correlation: CorrelationMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            reconnect: ReconnectConfig::default(),
            timeouts: TimeoutConfig::default(),
            correlation: CorrelationMode::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // Prefer the namespaced var; fall back to the plain name used by dev scripts.
        let url = lookup("UCE_BACKEND_WS_URL")
            .or_else(|| lookup("BACKEND_WS_URL"))
            .unwrap_or(defaults.url);

        let base_delay_ms = parse_var(
            &lookup,
            "UCE_RECONNECT_BASE_DELAY_MS",
            DEFAULT_RECONNECT_BASE_DELAY_MS,
        )?;
        let max_attempts = parse_var(
            &lookup,
            "UCE_RECONNECT_MAX_ATTEMPTS",
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
        )?;
        let jitter_factor: f64 = parse_var(&lookup, "UCE_RECONNECT_JITTER", 0.0)?;
        if !(0.0..=1.0).contains(&jitter_factor) {
            return Err(ConfigError::InvalidValue {
                var: "UCE_RECONNECT_JITTER",
                value: jitter_factor.to_string(),
            });
        }
        let standard_ms = parse_var(&lookup, "UCE_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?;
        let long_ms = parse_var(
            &lookup,
            "UCE_LONG_REQUEST_TIMEOUT_MS",
            DEFAULT_LONG_REQUEST_TIMEOUT_MS,
        )?;

        let correlation = match lookup("UCE_CORRELATION_MODE") {
            Some(raw) => CorrelationMode::parse(&raw).ok_or(ConfigError::InvalidValue {
                var: "UCE_CORRELATION_MODE",
                value: raw,
            })?,
            None => defaults.correlation,
        };

        let config = Self {
            url,
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(base_delay_ms),
                max_attempts,
                jitter_factor,
            },
            timeouts: TimeoutConfig {
                standard: Duration::from_millis(standard_ms),
                long: Duration::from_millis(long_ms),
            },
            correlation,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the endpoint is a plain `ws://` URL.
    ///
    /// The transport is built without TLS, so `wss://` is rejected here
    /// rather than failing on every handshake.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "ws" => Ok(()),
            "wss" => Err(ConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: "TLS (wss) is not supported by this build".into(),
            }),
            other => Err(ConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: format!("unsupported scheme '{other}'"),
            }),
        }
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
        None => Ok(default),
    }
}
