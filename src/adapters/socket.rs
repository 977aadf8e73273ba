//! Websocket transport: client connections with bounded open-state polling
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::task::AbortOnDropHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use super::{first_match, NotificationChannel, Subscription};
use crate::common::poll_until;
use crate::config::SocketConfig;
use crate::error::{errors, HarnessError, HarnessResult};
use crate::notification::Transport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection state of a websocket client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Handshake in progress
    Connecting,
    /// Handshake completed; messages can flow
    Open,
    /// Handshake failed or the socket was closed
    Closed,
}

/// Opens websocket subscriptions
#[derive(Debug, Clone)]
pub struct SocketSubscriber {
    config: SocketConfig,
}

impl SocketSubscriber {
    /// Create a subscriber using the polling settings in `config`
    pub fn new(config: SocketConfig) -> Self {
        Self { config }
    }

    /// Open a client connection to `address`, reporting under `routing_key`.
    ///
    /// The handshake runs in the background while its ready state is polled
    /// every `poll_interval`; if it isn't open after `max_open_attempts`
    /// checks the handshake is abandoned. Dropping the returned future
    /// before it resolves also abandons the handshake.
    #[instrument(skip(self), level = "debug")]
    pub async fn connect(&self, routing_key: &str, address: &str) -> HarnessResult<SocketSubscription> {
        let (state_tx, state_rx) = watch::channel(ReadyState::Connecting);

        let target = address.to_string();
        let handshake = AbortOnDropHandle::new(tokio::spawn(async move {
            match connect_async(target.as_str()).await {
                Ok((stream, _response)) => {
                    let _ = state_tx.send(ReadyState::Open);
                    Ok(stream)
                }
                Err(e) => {
                    warn!(address = %target, error = %e, "Websocket handshake failed");
                    let _ = state_tx.send(ReadyState::Closed);
                    Err(e)
                }
            }
        }));

        let log_context = format!("Websocket open state for {}", address);
        let polled = poll_until(
            || *state_rx.borrow() == ReadyState::Open,
            self.config.max_open_attempts,
            self.config.poll_interval(),
            &log_context,
        )
        .await;

        match polled {
            Ok(_) => {
                let stream = handshake
                    .await
                    .map_err(|e| errors::connection_failed(address, e))?
                    .map_err(|e| errors::connection_failed(address, e))?;
                info!(address = %address, routing_key = %routing_key, "Websocket connection open");

                Ok(SocketSubscription {
                    stream,
                    address: address.to_string(),
                    routing_key: routing_key.to_string(),
                })
            }
            Err(attempts) => {
                handshake.abort();
                Err(HarnessError::SocketNotOpen {
                    address: address.to_string(),
                    attempts,
                })
            }
        }
    }
}

#[async_trait]
impl NotificationChannel for SocketSubscriber {
    fn transport(&self) -> Transport {
        Transport::Socket
    }

    async fn subscribe(
        &self,
        routing_key: &str,
        location: &str,
    ) -> HarnessResult<Box<dyn Subscription>> {
        let subscription = self.connect(routing_key, location).await?;
        Ok(Box::new(subscription))
    }
}

/// An open websocket awaiting its notification
pub struct SocketSubscription {
    stream: WsStream,
    address: String,
    routing_key: String,
}

impl std::fmt::Debug for SocketSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketSubscription")
            .field("address", &self.address)
            .field("routing_key", &self.routing_key)
            .finish()
    }
}

impl SocketSubscription {
    /// Address the socket is connected to
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Read messages until one satisfies `filter`, the socket fails, or
    /// `timeout` passes. The socket is closed before returning.
    #[instrument(skip(self, filter), fields(routing_key = %self.routing_key), level = "debug")]
    pub async fn wait_for_match(
        mut self,
        filter: Option<&Value>,
        timeout: Duration,
    ) -> HarnessResult<Value> {
        let routing_key = self.routing_key.clone();
        let stream = &mut self.stream;
        let key = &routing_key;

        let frames = stream.filter_map(move |frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(Ok(text.as_bytes().to_vec())),
                Ok(Message::Binary(data)) => Some(Ok(data.to_vec())),
                Ok(Message::Close(frame)) => Some(Err(errors::socket_error(
                    key,
                    format!("closed by peer ({:?})", frame),
                ))),
                // Control frames carry no notification
                Ok(_) => None,
                Err(e) => Some(Err(errors::socket_error(key, e))),
            }
        });

        let outcome = tokio::time::timeout(timeout, async {
            first_match(frames, filter, &routing_key)
                .await?
                .ok_or_else(|| errors::socket_error(&routing_key, "connection closed"))
        })
        .await;

        self.close().await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(routing_key = %self.routing_key, ?timeout, "Timed out waiting for socket message");
                Err(errors::timeout(&self.routing_key, timeout))
            }
        }
    }

    async fn close(&mut self) {
        match tokio::time::timeout(CLOSE_TIMEOUT, self.stream.close(None)).await {
            Ok(Ok(())) => debug!(address = %self.address, "Websocket closed"),
            Ok(Err(e)) => debug!(address = %self.address, error = %e, "Websocket close failed"),
            Err(_) => debug!(address = %self.address, "Timeout sending close frame"),
        }
    }
}

#[async_trait]
impl Subscription for SocketSubscription {
    fn routing_key(&self) -> &str {
        &self.routing_key
    }

    async fn wait_for_match(
        self: Box<Self>,
        filter: Option<&Value>,
        timeout: Duration,
    ) -> HarnessResult<Value> {
        SocketSubscription::wait_for_match(*self, filter, timeout).await
    }
}
