//! Correlate the broker and websocket notifications provoked by an action.
//!
//! Integration tests drive the platform through some triggering action and
//! then need to observe the asynchronous notifications that action causes.
//! [`Correlator::action_and_wait_for_responses`] opens every expected
//! subscription first, runs the action, and collects one payload per
//! expectation:
//!
//! ```no_run
//! use serde_json::json;
//! use stealth_harness::{Correlator, HarnessConfig, HarnessError, NotificationSpec};
//!
//! # async fn run() -> Result<(), HarnessError> {
//! let config = HarnessConfig::from_env()?;
//! let correlator = Correlator::new(&config);
//!
//! let responses = [
//!     NotificationSpec::broker("trutask.history.list", "stealth"),
//!     NotificationSpec::socket("truTaskWebSocket", "ws://localhost:8082")
//!         .with_content(json!({ "state": "loaded" })),
//! ];
//! let result = correlator
//!     .publish_and_wait("trutask.traceinfo", json!({}), None, &responses)
//!     .await?;
//! println!("{:?}", result.socket("truTaskWebSocket"));
//! # Ok(())
//! # }
//! ```

// Export modules
pub mod adapters;
pub mod common;
pub mod config;
pub mod correlator;
pub mod error;
pub mod matcher;
pub mod notification;
pub mod payload;
pub mod telemetry;


pub use adapters::{
    BrokerSubscriber, BrokerSubscription, NotificationChannel, NotificationPublisher, ReadyState,
    SocketSubscriber, SocketSubscription, Subscription,
};
pub use config::{BrokerConfig, HarnessConfig, SocketConfig, DEFAULT_EXCHANGE};
pub use correlator::Correlator;
pub use error::{ErrorCategory, ErrorCode, HarnessError, HarnessResult};
pub use matcher::is_contained_in;
pub use notification::{CorrelatedResult, NotificationSpec, Transport};
