//! Integration tests for websocket subscriptions against a local server
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

use stealth_harness::{HarnessError, SocketConfig, SocketSubscriber};

use crate::ws_test_harness::{unused_address, WebSocketTestServer};

fn fast_config() -> SocketConfig {
    SocketConfig {
        poll_interval_ms: 20,
        max_open_attempts: 25,
    }
}

#[tokio::test]
async fn test_connect_and_receive_first_message() -> Result<()> {
    let server = WebSocketTestServer::start().await?;
    let subscriber = SocketSubscriber::new(fast_config());

    let subscription = subscriber.connect("truTaskWebSocket", &server.url()).await?;
    assert_eq!(subscription.address(), server.url());
    assert_eq!(server.connected(), 1);

    server.send_json(&json!({"state": "loaded", "exam": "1.2.3"}));
    let payload = subscription
        .wait_for_match(None, Duration::from_secs(5))
        .await?;

    assert_eq!(payload, json!({"state": "loaded", "exam": "1.2.3"}));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_filter_skips_until_match() -> Result<()> {
    let server = WebSocketTestServer::start().await?;
    let subscriber = SocketSubscriber::new(fast_config());
    let subscription = subscriber.connect("truTaskWebSocket", &server.url()).await?;

    server.send_text("heartbeat");
    server.send_json(&json!({"state": "loading"}));
    server.send_json(&json!({"state": "loaded", "series": [1, 2, 3]}));

    let filter = json!({"state": "loaded"});
    let payload = subscription
        .wait_for_match(Some(&filter), Duration::from_secs(5))
        .await?;

    assert_eq!(payload, json!({"state": "loaded", "series": [1, 2, 3]}));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_non_json_text_is_delivered_as_string() -> Result<()> {
    let server = WebSocketTestServer::start().await?;
    let subscriber = SocketSubscriber::new(fast_config());
    let subscription = subscriber.connect("plain", &server.url()).await?;

    server.send_text("ready");
    let payload = subscription
        .wait_for_match(None, Duration::from_secs(5))
        .await?;

    assert_eq!(payload, json!("ready"));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_socket_is_closed_after_match() -> Result<()> {
    let server = WebSocketTestServer::start().await?;
    let subscriber = SocketSubscriber::new(fast_config());
    let subscription = subscriber.connect("closing", &server.url()).await?;

    server.send_json(&json!({"done": true}));
    subscription
        .wait_for_match(None, Duration::from_secs(5))
        .await?;

    assert!(
        server.wait_for_disconnects(1, 2000).await,
        "Server should see the client close its socket"
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_timeout_names_routing_key() -> Result<()> {
    let server = WebSocketTestServer::start().await?;
    let subscriber = SocketSubscriber::new(fast_config());
    let subscription = subscriber.connect("quietSocket", &server.url()).await?;

    server.send_json(&json!({"state": "loading"}));
    let filter = json!({"state": "loaded"});
    let err = subscription
        .wait_for_match(Some(&filter), Duration::from_millis(300))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(
        err.to_string(),
        "Timeout waiting on message routing key: quietSocket to be received (after 300ms)"
    );
    assert!(server.wait_for_disconnects(1, 2000).await);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_server_close_fails_wait() -> Result<()> {
    let server = WebSocketTestServer::start().await?;
    let subscriber = SocketSubscriber::new(fast_config());
    let subscription = subscriber.connect("dropped", &server.url()).await?;

    server.close_clients();
    let err = subscription
        .wait_for_match(None, Duration::from_secs(5))
        .await
        .unwrap_err();

    match err {
        HarnessError::SocketError { routing_key, .. } => assert_eq!(routing_key, "dropped"),
        other => panic!("expected socket error, got {:?}", other),
    }

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unreachable_address_exhausts_open_attempts() -> Result<()> {
    let address = unused_address().await?;
    let subscriber = SocketSubscriber::new(SocketConfig {
        poll_interval_ms: 20,
        max_open_attempts: 4,
    });

    let start = Instant::now();
    let err = subscriber.connect("nowhere", &address).await.unwrap_err();

    match err {
        HarnessError::SocketNotOpen { address: reported, attempts } => {
            assert_eq!(reported, address);
            assert_eq!(attempts, 4);
        }
        other => panic!("expected socket-not-open, got {:?}", other),
    }
    // One interval elapses before every check
    assert!(start.elapsed() >= Duration::from_millis(80));
    Ok(())
}

#[tokio::test]
async fn test_dropped_connect_abandons_handshake() -> Result<()> {
    // Accepts the TCP connection but never answers the upgrade request
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = format!("ws://{}", listener.local_addr()?);
    let subscriber = SocketSubscriber::new(SocketConfig {
        poll_interval_ms: 20,
        max_open_attempts: 500,
    });

    let (pending, accepted) = tokio::join!(
        tokio::time::timeout(Duration::from_millis(300), subscriber.connect("silent", &address)),
        listener.accept(),
    );
    assert!(pending.is_err(), "connect should still be pending when dropped");
    let (mut peer, _) = accepted?;

    // Drain the upgrade request; the client side must then hang up
    let mut buf = [0u8; 1024];
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match peer.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;

    assert!(
        closed.is_ok(),
        "Handshake connection should be closed once connect is dropped"
    );
    Ok(())
}
