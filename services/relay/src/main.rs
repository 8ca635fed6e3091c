//! tlsmux
//!
//! Accepts TCP connections, classifies them as TLS or plaintext HTTP, checks
//! the peer address and requested hostname against allow-lists, and relays
//! them to the configured backends.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tlsmux_relay::{Args, Config, Listener};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_args(Args::parse()).context("Invalid configuration")?;

    // Initialize tracing (prefer RUST_LOG, fallback to --log-level)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let backends = config
        .backends
        .iter()
        .map(|b| b.as_str())
        .collect::<Vec<_>>()
        .join(",");

    info!("Starting tlsmux");
    info!(
        listen_addr = %config.listen_addr,
        backends = %backends,
        cidr = %config.allow_list,
        domains = %config.domains,
        routing_mode = ?config.domains.routing_mode(),
        connect_timeout = ?config.connect_timeout,
        "Configuration loaded"
    );

    let listener = Listener::bind(&config)
        .await
        .with_context(|| format!("Failed to bind listener on {}", config.listen_addr))?;

    Arc::new(listener).run().await.context("Listener failed")
}
