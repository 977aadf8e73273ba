//! Broker subscription and publishing tests.
//!
//! Tests marked `#[ignore]` need a running broker configured through the
//! `STEALTH_BROKER_*` environment variables:
//!
//! ```bash
//! STEALTH_BROKER_HOST=localhost cargo test --test integration -- --ignored
//! ```
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::net::TcpListener;
use uuid::Uuid;

use stealth_harness::telemetry::init_tracing;
use stealth_harness::{
    BrokerConfig, BrokerSubscriber, Correlator, HarnessConfig, HarnessError, NotificationSpec,
};

use crate::ws_test_harness::WebSocketTestServer;

/// Broker settings pointing at a port nothing listens on
async fn unreachable_broker() -> Result<BrokerConfig> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    Ok(BrokerConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..BrokerConfig::default()
    })
}

fn live_config() -> Result<HarnessConfig> {
    init_tracing("stealth_harness=debug,warn");
    Ok(HarnessConfig::from_env()?)
}

/// Routing key unique to this test so parallel tests don't see each other
fn unique_key(prefix: &str) -> String {
    format!("test.{}.{}", prefix, Uuid::new_v4().simple())
}

#[tokio::test]
async fn test_subscribe_to_unreachable_broker_fails() -> Result<()> {
    let subscriber = BrokerSubscriber::new(unreachable_broker().await?);

    let err = subscriber.subscribe("any.key", "stealth").await.unwrap_err();

    match err {
        HarnessError::ConnectionFailed { location, .. } => {
            assert_eq!(location, subscriber.location());
        }
        other => panic!("expected connection failure, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_publish_to_unreachable_broker_fails() -> Result<()> {
    let subscriber = BrokerSubscriber::new(unreachable_broker().await?);

    let err = subscriber
        .publish("any.key", &json!({"a": 1}), "stealth")
        .await
        .unwrap_err();

    match err {
        HarnessError::PublishFailed { routing_key, .. } => assert_eq!(routing_key, "any.key"),
        other => panic!("expected publish failure, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_unreachable_broker_fails_correlated_wait() -> Result<()> {
    let mut config = HarnessConfig::default();
    config.broker = unreachable_broker().await?;
    let correlator = Correlator::new(&config);

    let responses = [NotificationSpec::broker("trutask.history.list", "")];
    let err = correlator
        .action_and_wait_for_responses(|_: ()| async { Ok::<_, HarnessError>(()) }, (), &responses)
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::ConnectionFailed { .. }));
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running broker"]
async fn test_publish_and_receive() -> Result<()> {
    let config = live_config()?;
    let correlator = Correlator::new(&config);
    let key = unique_key("roundtrip");
    let message = json!({"rabbitKey1": "this is test key 1", "rabbitKey2": "this is test key two"});

    let responses = [NotificationSpec::broker(key.as_str(), "stealth")];
    let result = correlator
        .publish_and_wait(&key, message.clone(), Some("stealth"), &responses)
        .await?;

    assert_eq!(result.broker(&key), Some(&message));
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running broker"]
async fn test_matching_filter_receives_message() -> Result<()> {
    let config = live_config()?;
    let subscriber = BrokerSubscriber::new(config.broker.clone());
    let key = unique_key("filter");

    let subscription = subscriber.subscribe(&key, "stealth").await?;
    subscriber
        .publish(&key, &json!({"state": "loading"}), "stealth")
        .await?;
    subscriber
        .publish(&key, &json!({"state": "loaded", "exam": "1.2.3"}), "stealth")
        .await?;

    let filter = json!({"state": "loaded"});
    let payload = subscription
        .wait_for_match(Some(&filter), Duration::from_secs(5))
        .await?;

    assert_eq!(payload, json!({"state": "loaded", "exam": "1.2.3"}));
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running broker"]
async fn test_non_matching_filter_times_out() -> Result<()> {
    let config = live_config()?;
    let correlator = Correlator::new(&config);
    let key = unique_key("mismatch");

    let responses = [NotificationSpec::broker(key.as_str(), "stealth")
        .with_content(json!({"state": "loaded"}))
        .with_timeout(Duration::from_millis(500))];
    let err = correlator
        .publish_and_wait(&key, json!({"state": "failed"}), None, &responses)
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(err.to_string().contains(&key));
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running broker"]
async fn test_broker_and_socket_together() -> Result<()> {
    let mut config = live_config()?;
    config.socket.poll_interval_ms = 20;
    let correlator = Correlator::new(&config);
    let server = WebSocketTestServer::start().await?;
    let key = unique_key("combined");

    let responses = [
        NotificationSpec::broker(key.as_str(), "stealth"),
        NotificationSpec::socket("websocket_message", server.url()),
    ];
    let publisher = BrokerSubscriber::new(config.broker.clone());
    let (server_ref, publisher_ref, key_ref) = (&server, &publisher, key.as_str());

    let result = correlator
        .action_and_wait_for_responses(
            move |_: ()| async move {
                publisher_ref
                    .publish(key_ref, &json!({"rabbit": true}), "stealth")
                    .await?;
                server_ref.send_json(&json!({"socket": true}));
                Ok::<_, HarnessError>("This is the function output")
            },
            (),
            &responses,
        )
        .await?;

    assert_eq!(result.broker(&key), Some(&json!({"rabbit": true})));
    assert_eq!(result.socket("websocket_message"), Some(&json!({"socket": true})));
    assert_eq!(result.action_response, "This is the function output");

    server.shutdown().await;
    Ok(())
}
