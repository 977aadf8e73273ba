//! Action-and-wait correlation.
//!
//! A correlated wait opens every expected subscription first, then runs the
//! triggering action while all subscriptions wait concurrently. The call
//! succeeds only if the action and every subscription succeed; the first
//! failure drops the remaining waits, and each dropped subscription releases
//! its transport.

use futures::future::try_join_all;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::adapters::{
    BrokerSubscriber, NotificationChannel, NotificationPublisher, SocketSubscriber, Subscription,
};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::notification::{CorrelatedResult, NotificationSpec, Transport};

/// Runs actions and correlates the notifications they provoke
pub struct Correlator {
    broker: Arc<dyn NotificationChannel>,
    socket: Arc<dyn NotificationChannel>,
    publisher: Arc<dyn NotificationPublisher>,
    default_timeout: Duration,
    default_exchange: String,
}

impl Correlator {
    /// Create a correlator talking to the broker and websockets described by `config`
    pub fn new(config: &HarnessConfig) -> Self {
        let broker = Arc::new(BrokerSubscriber::new(config.broker.clone()));
        let socket = Arc::new(SocketSubscriber::new(config.socket.clone()));
        Self::with_channels(broker.clone(), socket, broker, config)
    }

    /// Create a correlator over caller-supplied transports
    pub fn with_channels(
        broker: Arc<dyn NotificationChannel>,
        socket: Arc<dyn NotificationChannel>,
        publisher: Arc<dyn NotificationPublisher>,
        config: &HarnessConfig,
    ) -> Self {
        Self {
            broker,
            socket,
            publisher,
            default_timeout: config.default_timeout(),
            default_exchange: config.broker.default_exchange.clone(),
        }
    }

    /// Timeout used for notifications that don't set their own
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn channel(&self, transport: Transport) -> &Arc<dyn NotificationChannel> {
        match transport {
            Transport::Broker => &self.broker,
            Transport::Socket => &self.socket,
        }
    }

    fn location<'a>(&'a self, spec: &'a NotificationSpec) -> &'a str {
        if spec.transport == Transport::Broker && spec.location.is_empty() {
            &self.default_exchange
        } else {
            &spec.location
        }
    }

    /// Perform `action(parameters)` while waiting for every notification in
    /// `responses`.
    ///
    /// All subscriptions are live before the action starts. The result holds
    /// one payload per expected notification, keyed by routing key within its
    /// transport, plus the action's own value. Any timeout, transport error or
    /// action error fails the whole call.
    #[instrument(skip_all, fields(expected = responses.len()))]
    pub async fn action_and_wait_for_responses<P, T, E, F, Fut>(
        &self,
        action: F,
        parameters: P,
        responses: &[NotificationSpec],
    ) -> HarnessResult<CorrelatedResult<T>>
    where
        F: FnOnce(P) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<HarnessError>,
    {
        let subscriptions = self.subscribe_all(responses).await?;
        info!(
            subscriptions = subscriptions.len(),
            "All subscriptions established, performing action"
        );

        let waits = self.wait_for_all(subscriptions, responses);
        let act = async { action(parameters).await.map_err(Into::<HarnessError>::into) };
        let (received, action_response) = tokio::try_join!(waits, act)?;

        let mut result = CorrelatedResult::new(action_response);
        for (transport, routing_key, payload) in received {
            result.insert(transport, routing_key, payload);
        }

        debug!(
            rabbitmq = result.rabbitmq.len(),
            websocket = result.websocket.len(),
            "Correlated wait complete"
        );
        Ok(result)
    }

    /// Publish `content` on the broker as the triggering action.
    ///
    /// `exchange` falls back to the configured default exchange.
    pub async fn publish_and_wait(
        &self,
        routing_key: &str,
        content: Value,
        exchange: Option<&str>,
        responses: &[NotificationSpec],
    ) -> HarnessResult<CorrelatedResult<()>> {
        let exchange = exchange.unwrap_or(&self.default_exchange);
        let publisher = &self.publisher;

        self.action_and_wait_for_responses(
            move |_: ()| async move { publisher.publish(routing_key, &content, exchange).await },
            (),
            responses,
        )
        .await
    }

    /// Open every subscription concurrently
    async fn subscribe_all(
        &self,
        responses: &[NotificationSpec],
    ) -> HarnessResult<Vec<Box<dyn Subscription>>> {
        try_join_all(responses.iter().map(|spec| async move {
            let location = self.location(spec);
            debug!(
                transport = %spec.transport,
                routing_key = %spec.routing_key,
                location = %location,
                "Opening subscription"
            );
            self.channel(spec.transport)
                .subscribe(&spec.routing_key, location)
                .await
        }))
        .await
    }

    /// Wait on every subscription concurrently, each with its own filter and timeout
    async fn wait_for_all(
        &self,
        subscriptions: Vec<Box<dyn Subscription>>,
        responses: &[NotificationSpec],
    ) -> HarnessResult<Vec<(Transport, String, Value)>> {
        try_join_all(subscriptions.into_iter().zip(responses).map(
            |(subscription, spec)| async move {
                let timeout = spec.timeout().unwrap_or(self.default_timeout);
                let payload = subscription
                    .wait_for_match(spec.content_filter.as_ref(), timeout)
                    .await?;
                Ok::<_, HarnessError>((spec.transport, spec.routing_key.clone(), payload))
            },
        ))
        .await
    }
}
