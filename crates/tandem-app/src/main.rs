//! Tandem Application server.
//!
//! Serves the example handlers over JSON-RPC 2.0 on HTTP, with streaming
//! methods pushed as server-sent events.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tandem_app::{handlers, start_server, DispatcherConfig};
use tandem_core::{ServerConfig, StreamConfig};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tandem-app")]
#[command(about = "JSON-RPC application server for Tandem")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value_t = ServerConfig::DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = ServerConfig::DEFAULT_HOST)]
    host: String,

    /// Buffered events per stream before the producer waits
    #[arg(long, default_value_t = StreamConfig::DEFAULT_CHANNEL_CAPACITY)]
    channel_capacity: usize,

    /// Maximum stream lifetime in seconds
    #[arg(long, default_value_t = StreamConfig::MAX_STREAM_DURATION.as_secs())]
    stream_timeout: u64,

    /// Milliseconds a cancelled producer gets before it is aborted
    #[arg(long, default_value_t = StreamConfig::CANCEL_GRACE.as_millis() as u64)]
    cancel_grace_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Tandem application server");

    let config = DispatcherConfig::new()
        .with_channel_capacity(args.channel_capacity)
        .with_stream_timeout(Duration::from_secs(args.stream_timeout))
        .with_cancel_grace(Duration::from_millis(args.cancel_grace_ms));
    let dispatcher = Arc::new(handlers::default_dispatcher(config));

    let server = start_server(dispatcher, &args.host, args.port).await?;

    // Machine-readable line for a supervising Engine process
    println!("RPC_PORT={}", server.addr().port());

    info!("RPC server running on {}", server.addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    server.shutdown().await;

    Ok(())
}
