//! Broker transport: topic exchange subscriptions and confirmed publishing
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{first_match, NotificationChannel, NotificationPublisher, Subscription};
use crate::config::BrokerConfig;
use crate::error::{errors, HarnessResult};
use crate::notification::Transport;
use crate::payload::encode_content;

const REPLY_SUCCESS: u16 = 200;

/// Opens broker subscriptions and publishes messages, one connection per operation
#[derive(Debug, Clone)]
pub struct BrokerSubscriber {
    config: BrokerConfig,
}

impl BrokerSubscriber {
    /// Create a subscriber for the broker described by `config`
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    /// Broker settings in use
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Human-readable broker location, used in errors and logs
    pub fn location(&self) -> String {
        format!("amqp://{}:{}", self.config.host, self.config.port)
    }

    fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.config.username.clone(),
                    password: self.config.password.clone(),
                },
                host: self.config.host.clone(),
                port: self.config.port,
            },
            vhost: self.config.vhost.clone(),
            ..Default::default()
        }
    }

    /// Open a connection and a channel with the exchange asserted as a
    /// non-durable topic exchange
    async fn open_link(&self, exchange: &str, confirm: bool) -> HarnessResult<BrokerLink> {
        let connection = Connection::connect_uri(self.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(|e| errors::connection_failed(self.location(), e))?;

        // From here on the link owns the connection and closes it if we bail out
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| errors::connection_failed(self.location(), e))?;
        let link = BrokerLink {
            connection: Some(connection),
            channel,
        };

        if confirm {
            link.channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| errors::broker_operation("confirm_select", e))?;
        }

        link.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                errors::connection_failed(self.location(), format!("exchange '{}': {}", exchange, e))
            })?;

        Ok(link)
    }

    /// Bind a private exclusive queue to `routing_key` on `exchange`
    #[instrument(skip(self), level = "debug")]
    pub async fn subscribe(&self, routing_key: &str, exchange: &str) -> HarnessResult<BrokerSubscription> {
        let link = self.open_link(exchange, false).await?;

        // Exclusive, non-durable: the broker names it and removes it with the connection
        let queue = link
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    durable: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| errors::broker_operation("queue_declare", e))?;
        let queue = queue.name().as_str().to_string();

        link.channel
            .queue_bind(
                &queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| errors::broker_operation("queue_bind", e))?;

        info!(
            routing_key = %routing_key,
            exchange = %exchange,
            queue = %queue,
            "Subscribed to routing key"
        );

        Ok(BrokerSubscription {
            link,
            queue,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        })
    }

    /// Publish `content` and wait for the broker to confirm it.
    ///
    /// Channel and connection are closed whether or not the publish succeeds.
    #[instrument(skip(self, content), level = "debug")]
    pub async fn publish(&self, routing_key: &str, content: &Value, exchange: &str) -> HarnessResult<()> {
        let mut link = self
            .open_link(exchange, true)
            .await
            .map_err(|e| errors::publish_failed(routing_key, e))?;

        let body = encode_content(content);
        let result = publish_confirmed(&link.channel, exchange, routing_key, &body).await;
        link.close().await;

        match result {
            Ok(()) => {
                debug!(routing_key = %routing_key, exchange = %exchange, bytes = body.len(), "Publish confirmed");
                Ok(())
            }
            Err(reason) => {
                warn!(routing_key = %routing_key, exchange = %exchange, error = %reason, "Publish failed");
                Err(errors::publish_failed(routing_key, reason))
            }
        }
    }
}

async fn publish_confirmed(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    body: &[u8],
) -> Result<(), String> {
    let confirm = channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions::default(),
            body,
            BasicProperties::default(),
        )
        .await
        .map_err(|e| e.to_string())?;

    let confirmation = confirm.await.map_err(|e| e.to_string())?;
    if confirmation.is_nack() {
        return Err("broker did not acknowledge the message".to_string());
    }
    Ok(())
}

#[async_trait]
impl NotificationChannel for BrokerSubscriber {
    fn transport(&self) -> Transport {
        Transport::Broker
    }

    async fn subscribe(
        &self,
        routing_key: &str,
        location: &str,
    ) -> HarnessResult<Box<dyn Subscription>> {
        let subscription = BrokerSubscriber::subscribe(self, routing_key, location).await?;
        Ok(Box::new(subscription))
    }
}

#[async_trait]
impl NotificationPublisher for BrokerSubscriber {
    async fn publish(&self, routing_key: &str, content: &Value, exchange: &str) -> HarnessResult<()> {
        BrokerSubscriber::publish(self, routing_key, content, exchange).await
    }
}

/// Connection and channel owned by one subscription or publish.
///
/// Dropping an unclosed link schedules the connection close on the runtime.
struct BrokerLink {
    connection: Option<Connection>,
    channel: Channel,
}

impl BrokerLink {
    async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = self.channel.close(REPLY_SUCCESS, "done").await {
                debug!(error = %e, "Channel close failed");
            }
            if let Err(e) = connection.close(REPLY_SUCCESS, "done").await {
                warn!(error = %e, "Connection close failed");
            }
        }
    }
}

impl Drop for BrokerLink {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = connection.close(REPLY_SUCCESS, "subscription dropped").await {
                            debug!(error = %e, "Close of dropped broker connection failed");
                        }
                    });
                }
                Err(_) => warn!("Broker connection dropped outside a runtime; left for the broker to reap"),
            }
        }
    }
}

/// A bound, not yet consumed broker queue
pub struct BrokerSubscription {
    link: BrokerLink,
    queue: String,
    exchange: String,
    routing_key: String,
}

impl std::fmt::Debug for BrokerSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSubscription")
            .field("queue", &self.queue)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .finish()
    }
}

impl BrokerSubscription {
    /// Routing key the queue is bound to
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Broker-assigned queue name
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Consume (auto-ack) until a message satisfies `filter` or `timeout` passes.
    ///
    /// Non-matching messages are skipped. The channel and connection are
    /// closed before returning on every path.
    #[instrument(skip(self, filter), fields(routing_key = %self.routing_key), level = "debug")]
    pub async fn wait_for_match(
        mut self,
        filter: Option<&Value>,
        timeout: Duration,
    ) -> HarnessResult<Value> {
        let consumer = self
            .link
            .channel
            .basic_consume(
                &self.queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| errors::broker_operation("basic_consume", e))?;

        let routing_key = self.routing_key.clone();
        let bodies = consumer.map(|delivery| {
            delivery
                .map(|delivery| delivery.data)
                .map_err(|e| errors::broker_operation("consume", e))
        });

        let outcome = tokio::time::timeout(timeout, async {
            first_match(bodies, filter, &routing_key)
                .await?
                .ok_or_else(|| errors::broker_operation("consume", "consumer stream ended"))
        })
        .await;

        self.link.close().await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(routing_key = %self.routing_key, ?timeout, "Timed out waiting for message");
                Err(errors::timeout(&self.routing_key, timeout))
            }
        }
    }
}

#[async_trait]
impl Subscription for BrokerSubscription {
    fn routing_key(&self) -> &str {
        &self.routing_key
    }

    async fn wait_for_match(
        self: Box<Self>,
        filter: Option<&Value>,
        timeout: Duration,
    ) -> HarnessResult<Value> {
        BrokerSubscription::wait_for_match(*self, filter, timeout).await
    }
}
