use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};
use url::{Host, Url};

use crate::error::{errors, HarnessError, HarnessResult};

// Default configuration values
pub const DEFAULT_EXCHANGE: &str = "stealth";
const DEFAULT_BROKER_HOST: &str = "127.0.0.1";
const DEFAULT_BROKER_PORT: u16 = 5672;
const DEFAULT_BROKER_USERNAME: &str = "stealth";
const DEFAULT_BROKER_PASSWORD: &str = ";subrosa;";
const DEFAULT_BROKER_VHOST: &str = "/";
const DEFAULT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
const DEFAULT_MAX_OPEN_ATTEMPTS: u32 = 10;

/// Main configuration struct for the harness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Message broker connection settings
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Websocket client settings
    #[serde(default)]
    pub socket: SocketConfig,
    /// Wait timeout applied to notifications that don't carry their own
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

/// Message broker connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker hostname
    #[serde(default = "default_broker_host")]
    pub host: String,
    /// Broker AMQP port
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Username credential
    #[serde(default = "default_broker_username")]
    pub username: String,
    /// Password credential
    #[serde(default = "default_broker_password")]
    pub password: String,
    /// Virtual host
    #[serde(default = "default_broker_vhost")]
    pub vhost: String,
    /// Exchange used when the caller doesn't name one
    #[serde(default = "default_exchange")]
    pub default_exchange: String,
}

/// Websocket client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Interval between ready state checks while opening
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Number of ready state checks before giving up
    #[serde(default = "default_max_open_attempts")]
    pub max_open_attempts: u32,
}

// Default functions
fn default_broker_host() -> String {
    if let Ok(host) = std::env::var("STEALTH_BROKER_HOST") {
        return host;
    }
    match std::env::var("STEALTH_TEST_URL") {
        Ok(url) => host_from_url(&url).unwrap_or_else(|| {
            warn!("STEALTH_TEST_URL has no usable host ({}), using {}", url, DEFAULT_BROKER_HOST);
            DEFAULT_BROKER_HOST.to_string()
        }),
        Err(_) => DEFAULT_BROKER_HOST.to_string(),
    }
}

fn default_broker_port() -> u16 {
    std::env::var("STEALTH_BROKER_PORT")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_BROKER_PORT)
}

fn default_broker_username() -> String {
    std::env::var("STEALTH_BROKER_USERNAME").unwrap_or_else(|_| DEFAULT_BROKER_USERNAME.to_string())
}

fn default_broker_password() -> String {
    std::env::var("STEALTH_BROKER_PASSWORD").unwrap_or_else(|_| DEFAULT_BROKER_PASSWORD.to_string())
}

fn default_broker_vhost() -> String {
    std::env::var("STEALTH_BROKER_VHOST").unwrap_or_else(|_| DEFAULT_BROKER_VHOST.to_string())
}

fn default_exchange() -> String {
    std::env::var("STEALTH_DEFAULT_EXCHANGE").unwrap_or_else(|_| DEFAULT_EXCHANGE.to_string())
}

fn default_timeout_ms() -> u64 {
    std::env::var("STEALTH_DEFAULT_TIMEOUT_MS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_MS)
}

fn default_poll_interval_ms() -> u64 {
    std::env::var("STEALTH_SOCKET_POLL_INTERVAL_MS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
}

fn default_max_open_attempts() -> u32 {
    std::env::var("STEALTH_SOCKET_MAX_ATTEMPTS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_MAX_OPEN_ATTEMPTS)
}

/// Extract the host part of a URL such as `http://10.0.0.5:8080/path`.
///
/// Returns `None` for anything that doesn't parse as a URL with a host.
/// IPv6 hosts are returned without brackets.
pub fn host_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;

    match parsed.host()? {
        Host::Ipv6(addr) => Some(addr.to_string()),
        host => Some(host.to_string()),
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            socket: SocketConfig::default(),
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: default_broker_username(),
            password: default_broker_password(),
            vhost: default_broker_vhost(),
            default_exchange: default_exchange(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_open_attempts: default_max_open_attempts(),
        }
    }
}

impl HarnessConfig {
    /// Build a configuration from environment variables and defaults
    pub fn from_env() -> HarnessResult<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file; missing fields fall back to defaults
    pub async fn load(path: &Path) -> HarnessResult<Self> {
        let config_str = fs::read_to_string(path)
            .await
            .map_err(|e| io_error(path, e))?;
        let config: Self = serde_json::from_str(&config_str).map_err(|e| io_error(path, e))?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());

        Ok(config)
    }

    /// Reject values the subscribers can't work with
    pub fn validate(&self) -> HarnessResult<()> {
        if self.broker.host.trim().is_empty() {
            return Err(errors::config_invalid("broker.host", "", "host must not be empty"));
        }
        if self.broker.port == 0 {
            return Err(errors::config_invalid("broker.port", 0, "port must be non-zero"));
        }
        if self.socket.poll_interval_ms == 0 {
            return Err(errors::config_invalid(
                "socket.poll_interval_ms",
                0,
                "poll interval must be non-zero",
            ));
        }
        if self.socket.max_open_attempts == 0 {
            return Err(errors::config_invalid(
                "socket.max_open_attempts",
                0,
                "at least one attempt is required",
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(errors::config_invalid(
                "default_timeout_ms",
                0,
                "timeout must be non-zero",
            ));
        }
        Ok(())
    }

    /// Default wait timeout as a duration
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl SocketConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> HarnessError {
    HarnessError::ConfigIo {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}
