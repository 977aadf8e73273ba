//! Command-line entry point for stealth-harness
//!
//! Publish a message on the platform broker:
//! ```bash
//! stealth-harness publish --routing-key trutask.traceinfo '{}'
//! ```
//!
//! Wait for one notification and print it:
//! ```bash
//! stealth-harness listen --transport websocket --routing-key truTask \
//!     --location ws://localhost:8082 --filter '{"state":"loaded"}'
//! ```

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};

use stealth_harness::payload::parse_content_arg;
use stealth_harness::telemetry::{init_tracing, DEFAULT_LOG_FILTER};
use stealth_harness::{Correlator, HarnessConfig, HarnessError, NotificationSpec, Transport};

#[derive(Parser)]
#[command(name = "stealth-harness")]
#[command(about = "Publish and await platform notifications", long_about = None)]
struct Cli {
    /// JSON configuration file (defaults come from the environment)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a message and wait for the broker to confirm it
    Publish {
        /// Routing key to publish under
        #[arg(long)]
        routing_key: String,

        /// Exchange to publish on (defaults to the configured exchange)
        #[arg(long)]
        exchange: Option<String>,

        /// Message content; JSON when it parses, raw text otherwise
        content: String,
    },

    /// Wait for one notification and print it as JSON
    Listen {
        /// Transport to listen on (rabbitmq or websocket)
        #[arg(long, value_parser = clap::value_parser!(Transport))]
        transport: Transport,

        /// Routing key to bind (broker) or report under (websocket)
        #[arg(long)]
        routing_key: String,

        /// Exchange name or websocket URL
        #[arg(long, default_value = "")]
        location: String,

        /// Partial JSON content the notification must contain
        #[arg(long)]
        filter: Option<String>,

        /// Wait timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = dotenvy::dotenv().ok();

    init_tracing(DEFAULT_LOG_FILTER);

    match env_file_path {
        Some(path) => info!("Loaded environment variables from {}", path.display()),
        None => debug!("No .env file found. Using existing environment variables."),
    };

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => HarnessConfig::load(path).await,
        None => HarnessConfig::from_env(),
    }
    .map_err(report)?;

    match cli.command {
        Commands::Publish {
            routing_key,
            exchange,
            content,
        } => publish(&config, &routing_key, exchange, &content).await,
        Commands::Listen {
            transport,
            routing_key,
            location,
            filter,
            timeout_ms,
        } => {
            let mut spec = match transport {
                Transport::Broker => NotificationSpec::broker(routing_key, location),
                Transport::Socket => NotificationSpec::socket(routing_key, location),
            };
            if let Some(filter) = filter {
                spec = spec.with_content(parse_content_arg(&filter));
            }
            if let Some(timeout_ms) = timeout_ms {
                spec = spec.with_timeout(Duration::from_millis(timeout_ms));
            }
            listen(&config, spec).await
        }
    }
}

async fn publish(config: &HarnessConfig, routing_key: &str, exchange: Option<String>, content: &str) -> Result<()> {
    let broker = stealth_harness::BrokerSubscriber::new(config.broker.clone());
    let exchange = exchange.unwrap_or_else(|| config.broker.default_exchange.clone());

    broker
        .publish(routing_key, &parse_content_arg(content), &exchange)
        .await
        .map_err(report)?;

    info!(routing_key = %routing_key, exchange = %exchange, "Message published");
    Ok(())
}

async fn listen(config: &HarnessConfig, spec: NotificationSpec) -> Result<()> {
    if spec.transport == Transport::Socket && spec.location.is_empty() {
        return Err(anyhow!("--location is required for websocket notifications"));
    }

    let correlator = Correlator::new(config);
    let routing_key = spec.routing_key.clone();
    let transport = spec.transport;

    let result = correlator
        .action_and_wait_for_responses(|_: ()| async { Ok::<_, HarnessError>(()) }, (), &[spec])
        .await
        .map_err(report)?;

    let payload = match transport {
        Transport::Broker => result.broker(&routing_key),
        Transport::Socket => result.socket(&routing_key),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn report(e: HarnessError) -> anyhow::Error {
    error!(code = %e.code(), category = %e.category(), "{}", e);
    anyhow!(e)
}
