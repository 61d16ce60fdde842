//! Tandem Engine command-line client.
//!
//! Sends one call to a running Application and prints the result, or every
//! event of a stream, as JSON lines.

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tandem_core::{RetryConfig, ServerConfig};
use tandem_engine::{CallOptions, ClientConfig, EngineClient, StreamOptions};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tandem-engine")]
#[command(about = "Call a Tandem application over JSON-RPC")]
struct Args {
    /// Method to call
    method: String,

    /// Params as a JSON object or array
    #[arg(default_value = "{}")]
    params: String,

    /// Application RPC endpoint
    #[arg(long, default_value_t = format!("http://{}:{}{}", ServerConfig::DEFAULT_HOST, ServerConfig::DEFAULT_PORT, ServerConfig::RPC_PATH))]
    url: String,

    /// Treat the method as streaming
    #[arg(short, long)]
    stream: bool,

    /// Send as a notification (no response expected)
    #[arg(short, long, conflicts_with = "stream")]
    notify: bool,

    /// Per-call timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Per-event timeout in seconds for streams
    #[arg(long)]
    event_timeout: Option<u64>,

    /// Maximum attempts for transport failures
    #[arg(long)]
    attempts: Option<u32>,

    /// Allow retrying timed-out calls
    #[arg(long)]
    idempotent: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let params: serde_json::Value =
        serde_json::from_str(&args.params).context("params must be valid JSON")?;

    let mut config = ClientConfig::default();
    if let Some(attempts) = args.attempts {
        config = config.with_retry(RetryConfig::default().with_max_attempts(attempts));
    }
    if let Some(secs) = args.timeout {
        config = config.with_call_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.event_timeout {
        config = config.with_stream_event_timeout(Duration::from_secs(secs));
    }

    let client = EngineClient::new(&args.url, config)?;
    info!("Calling {} on {}", args.method, args.url);

    if args.notify {
        client.notify(&args.method, params).await?;
        return Ok(());
    }

    if args.stream {
        let mut stream = client
            .call_stream(&args.method, params, StreamOptions::new())
            .await?;
        while let Some(event) = stream.next().await {
            println!("{}", serde_json::to_string(&event?.to_notification())?);
        }
        return Ok(());
    }

    let mut options = CallOptions::new();
    if args.idempotent {
        options = options.idempotent();
    }
    let result = client.call_unary(&args.method, params, options).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
