//! Session-scoped authenticating reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────┐
//!                         │                    SESSION PROXY                      │
//!                         │                                                       │
//!   POST /create-session  │  ┌─────────┐    ┌───────────┐    ┌──────────────┐    │
//!   ──────────────────────┼─▶│  http   │───▶│ directory │───▶│   session    │    │
//!                         │  │ server  │    └───────────┘    │   registry   │    │
//!                         │  └────┬────┘                     └──────┬───────┘    │
//!   /p/<sid>/...          │       │                                 │ lookup     │
//!   ──────────────────────┼──────▶│        ┌────────────┐           ▼            │
//!                         │       ├───────▶│ forwarder  │──── credential ────────┼──▶ Backend
//!                         │       │        │ + rewrite  │◀───────────────────────┼─── (HTTP)
//!                         │       │        └────────────┘                        │
//!   Upgrade / /ws/<sid>   │       │        ┌────────────┐                        │
//!   ◀═════════════════════┼══════▶└───────▶│  tunnel    │◀══════ frames ═════════┼══▶ Backend
//!                         │                └────────────┘                        │     (WS)
//!                         │  ┌─────────────────────────────────────────────────┐ │
//!                         │  │ config · observability · lifecycle · admin      │ │
//!                         │  └─────────────────────────────────────────────────┘ │
//!                         └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use session_proxy::config::{load_config, ProxyConfig};
use session_proxy::http::HttpServer;
use session_proxy::lifecycle::{signals, Shutdown};
use session_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "session-proxy")]
#[command(about = "Session-scoped authenticating reverse proxy", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "session-proxy starting");

    tracing::info!(
        config_file = ?args.config,
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        session_ttl_secs = config.sessions.ttl_secs,
        snapshot = ?config.sessions.snapshot_path,
        admin = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config)?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(&shutdown);

    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
