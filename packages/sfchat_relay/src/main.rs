use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;

use sfchat_relay::{DEFAULT_PORT, RelayConfig, router};

#[derive(Parser)]
#[command(name = "sfchat-relay")]
#[command(about = "WebSocket relay for sfchat clients")]
struct Args {
    /// Host to bind to
    #[arg(short = 'b', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for the upstream connection
    #[arg(long, default_value = "10")]
    connect_timeout_secs: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "sfchat_relay=debug,tower_http=debug,info"
    } else {
        "sfchat_relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let app = router(RelayConfig {
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
    });

    let addr = format!("{}:{}", args.host, args.port)
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("sfchat relay listening on ws://{}", listener.local_addr()?);

    let shutdown_signal = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")
}
