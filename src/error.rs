use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error codes for programmatic handling of harness failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Transport errors
    ConnectionFailed,
    SocketNotOpen,
    SocketError,
    BrokerOperationFailed,

    // Wait errors
    NotificationTimeout,

    // Publish errors
    PublishFailed,

    // Configuration related errors
    ConfigInvalid,
    ConfigIo,

    // The triggering action itself failed
    ActionFailed,
}

/// Error categories, used to decide how a failure is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transport unreachable or dropped
    Network,
    /// The expected notification never arrived
    Timeout,
    /// The broker or socket rejected an operation
    Protocol,
    /// Configuration errors - not recoverable without reconfiguration
    Configuration,
    /// Failure raised by the caller-supplied action
    Action,
}

/// Harness error types using thiserror
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to connect to '{location}': {reason}")]
    ConnectionFailed { location: String, reason: String },

    #[error("Could not achieve websocket open state for '{address}'. Maximum number of attempts ({attempts}) exceeded")]
    SocketNotOpen { address: String, attempts: u32 },

    #[error("Websocket error occurred while listening for '{routing_key}': {reason}")]
    SocketError { routing_key: String, reason: String },

    #[error("Broker operation '{operation}' failed: {reason}")]
    Broker { operation: String, reason: String },

    #[error("Timeout waiting on message routing key: {routing_key} to be received (after {timeout_ms}ms)")]
    Timeout { routing_key: String, timeout_ms: u64 },

    #[error("An error occurred while attempting to publish {routing_key}, as follows: {reason}")]
    PublishFailed { routing_key: String, reason: String },

    #[error("Invalid configuration value for '{key}': '{value}' ({reason})")]
    ConfigInvalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read configuration from '{path}': {reason}")]
    ConfigIo { path: String, reason: String },

    #[error("Triggering action failed: {0}")]
    Action(#[from] anyhow::Error),
}

impl HarnessError {
    /// Stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Self::SocketNotOpen { .. } => ErrorCode::SocketNotOpen,
            Self::SocketError { .. } => ErrorCode::SocketError,
            Self::Broker { .. } => ErrorCode::BrokerOperationFailed,
            Self::Timeout { .. } => ErrorCode::NotificationTimeout,
            Self::PublishFailed { .. } => ErrorCode::PublishFailed,
            Self::ConfigInvalid { .. } => ErrorCode::ConfigInvalid,
            Self::ConfigIo { .. } => ErrorCode::ConfigIo,
            Self::Action(_) => ErrorCode::ActionFailed,
        }
    }

    /// Category this error falls into
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConnectionFailed { .. } | Self::SocketNotOpen { .. } | Self::SocketError { .. } => {
                ErrorCategory::Network
            }
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Broker { .. } | Self::PublishFailed { .. } => ErrorCategory::Protocol,
            Self::ConfigInvalid { .. } | Self::ConfigIo { .. } => ErrorCategory::Configuration,
            Self::Action(_) => ErrorCategory::Action,
        }
    }

    /// Returns true if the failure means the expected notification never showed up
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConnectionFailed => "connection_failed",
            Self::SocketNotOpen => "socket_not_open",
            Self::SocketError => "socket_error",
            Self::BrokerOperationFailed => "broker_operation_failed",
            Self::NotificationTimeout => "notification_timeout",
            Self::PublishFailed => "publish_failed",
            Self::ConfigInvalid => "config_invalid",
            Self::ConfigIo => "config_io",
            Self::ActionFailed => "action_failed",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::Configuration => "configuration",
            Self::Action => "action",
        };
        write!(f, "{}", s)
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Helpers for building harness errors
pub mod errors {
    use super::*;

    /// Create a connection failed error
    pub fn connection_failed(location: impl Into<String>, reason: impl fmt::Display) -> HarnessError {
        HarnessError::ConnectionFailed {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a broker operation error
    pub fn broker_operation(operation: impl Into<String>, reason: impl fmt::Display) -> HarnessError {
        HarnessError::Broker {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a socket error
    pub fn socket_error(routing_key: impl Into<String>, reason: impl fmt::Display) -> HarnessError {
        HarnessError::SocketError {
            routing_key: routing_key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a notification timeout error
    pub fn timeout(routing_key: impl Into<String>, timeout: std::time::Duration) -> HarnessError {
        HarnessError::Timeout {
            routing_key: routing_key.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a publish failed error
    pub fn publish_failed(routing_key: impl Into<String>, reason: impl fmt::Display) -> HarnessError {
        HarnessError::PublishFailed {
            routing_key: routing_key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a configuration invalid error
    pub fn config_invalid(
        key: impl Into<String>,
        value: impl fmt::Display,
        reason: impl Into<String>,
    ) -> HarnessError {
        HarnessError::ConfigInvalid {
            key: key.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
