//! Transport adapters for notification subscriptions.
//!
//! Both transports expose the same two-step contract: `subscribe` opens an
//! exclusive connection up front, and the returned [`Subscription`] is
//! consumed by exactly one `wait_for_match`.

pub mod broker;
pub mod socket;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::HarnessResult;
use crate::matcher::accepts;
use crate::notification::Transport;
use crate::payload::decode_payload;

pub use broker::{BrokerSubscriber, BrokerSubscription};
pub use socket::{ReadyState, SocketSubscriber, SocketSubscription};

/// A transport that can open notification subscriptions
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Transport this channel serves
    fn transport(&self) -> Transport;

    /// Open a live subscription for `routing_key` at `location`.
    ///
    /// When this returns, no notification sent afterwards can be missed.
    async fn subscribe(
        &self,
        routing_key: &str,
        location: &str,
    ) -> HarnessResult<Box<dyn Subscription>>;
}

/// A single-use, live subscription
#[async_trait]
pub trait Subscription: Send {
    /// Routing key this subscription reports under
    fn routing_key(&self) -> &str;

    /// Wait for the first message accepted by `filter`, then release the
    /// transport. The transport is released on every exit path.
    async fn wait_for_match(
        self: Box<Self>,
        filter: Option<&Value>,
        timeout: Duration,
    ) -> HarnessResult<Value>;
}

/// A transport that can publish notifications
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    /// Publish `content` under `routing_key`, resolving once delivery is confirmed
    async fn publish(&self, routing_key: &str, content: &Value, exchange: &str) -> HarnessResult<()>;
}

/// Decode bodies from `bodies` until one satisfies `filter`.
///
/// Non-matching bodies are skipped and the first error is returned as is.
/// Resolves to `None` when the stream ends without a match.
pub(crate) async fn first_match<S, B>(
    bodies: S,
    filter: Option<&Value>,
    routing_key: &str,
) -> HarnessResult<Option<Value>>
where
    S: Stream<Item = HarnessResult<B>>,
    B: AsRef<[u8]>,
{
    futures_util::pin_mut!(bodies);

    while let Some(body) = bodies.next().await {
        let payload = decode_payload(body?.as_ref());

        if accepts(filter, &payload) {
            debug!(routing_key = %routing_key, "Received matching message");
            return Ok(Some(payload));
        }
        debug!(routing_key = %routing_key, payload = %payload, "Skipping non-matching message");
    }

    Ok(None)
}
