//! Declarative description of the notifications a triggering action should
//! provoke, and the merged result of waiting for them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Transport a notification is expected on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    /// Topic exchange on the message broker
    #[serde(rename = "rabbitmq")]
    Broker,
    /// Websocket endpoint
    #[serde(rename = "websocket")]
    Socket,
}

impl Transport {
    /// Wire name of the transport, also the key of its result namespace
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broker => "rabbitmq",
            Self::Socket => "websocket",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rabbitmq" | "broker" | "amqp" => Ok(Self::Broker),
            "websocket" | "socket" | "ws" => Ok(Self::Socket),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

/// One notification expected as a consequence of an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSpec {
    /// Transport to listen on
    #[serde(rename = "type")]
    pub transport: Transport,
    /// Broker routing key; also the key of the result entry
    pub routing_key: String,
    /// Exchange name (broker) or websocket URL (socket)
    #[serde(rename = "messageLocation", default)]
    pub location: String,
    /// Partial content the notification must contain
    #[serde(rename = "messageContent", default, skip_serializing_if = "Option::is_none")]
    pub content_filter: Option<Value>,
    /// Wait timeout in milliseconds, overriding the configured default
    #[serde(rename = "timeout", default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl NotificationSpec {
    /// Expect a broker message on `routing_key` published to `exchange`
    pub fn broker(routing_key: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            transport: Transport::Broker,
            routing_key: routing_key.into(),
            location: exchange.into(),
            content_filter: None,
            timeout_ms: None,
        }
    }

    /// Expect a websocket message at `address`, reported under `routing_key`
    pub fn socket(routing_key: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            transport: Transport::Socket,
            routing_key: routing_key.into(),
            location: address.into(),
            content_filter: None,
            timeout_ms: None,
        }
    }

    /// Only accept messages containing `content`
    pub fn with_content(mut self, content: Value) -> Self {
        self.content_filter = Some(content);
        self
    }

    /// Override the wait timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Wait timeout, if one was given
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Everything observed during one correlated wait
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatedResult<T> {
    /// Broker payloads keyed by routing key
    pub rabbitmq: HashMap<String, Value>,
    /// Websocket payloads keyed by routing key
    pub websocket: HashMap<String, Value>,
    /// Value returned by the triggering action
    pub action_response: T,
}

impl<T> CorrelatedResult<T> {
    pub(crate) fn new(action_response: T) -> Self {
        Self {
            rabbitmq: HashMap::new(),
            websocket: HashMap::new(),
            action_response,
        }
    }

    pub(crate) fn insert(&mut self, transport: Transport, routing_key: String, payload: Value) {
        match transport {
            Transport::Broker => self.rabbitmq.insert(routing_key, payload),
            Transport::Socket => self.websocket.insert(routing_key, payload),
        };
    }

    /// Payload received on the broker for `routing_key`
    pub fn broker(&self, routing_key: &str) -> Option<&Value> {
        self.rabbitmq.get(routing_key)
    }

    /// Payload received on a websocket for `routing_key`
    pub fn socket(&self, routing_key: &str) -> Option<&Value> {
        self.websocket.get(routing_key)
    }
}
