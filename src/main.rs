//! cryptopulse server: headless market data collection and feature
//! materialization platform.
//!
//! # Usage
//! ```sh
//! DB_HOST=127.0.0.1 DB_USER=cryptopulse DB_PASSWORD=... cargo run
//! ```
//!
//! The control plane listens on `HTTP_PORT` (default 8080); see /status,
//! /metrics, /collect, /backfill.

use anyhow::{Context, Result};
use clap::Parser;
use std::future::IntoFuture;
use cryptopulse::application::system::Application;
use cryptopulse::config::Config;
use cryptopulse::infrastructure::observability::LogBuffer;
use cryptopulse::interfaces::http::{AppState, router};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "cryptopulse", version, about = "Crypto market data collection platform")]
struct Cli {
    /// Control-plane port; overrides HTTP_PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Retained log lines served by GET /logs.
    #[arg(long, default_value_t = 2000)]
    log_buffer_lines: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Two subscriber layers: pretty stdout, plus the ring buffer that backs
    // GET /logs.
    let log_buffer = LogBuffer::new(cli.log_buffer_lines);
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    let buffer_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_buffer.clone())
        .with_ansi(false)
        .with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .with(buffer_layer)
        .init();

    info!("cryptopulse {} starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.http_port = port;
    }
    let http_port = config.http_port;

    let app = Application::build(config).await?;
    app.start().await;

    let state = Arc::new(AppState::new(
        app.scheduler.clone(),
        app.updater.clone(),
        app.placeholders.clone(),
        app.config.clone(),
        app.metrics.clone(),
        app.alerts.clone(),
        log_buffer,
    ));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port))
        .await
        .with_context(|| format!("failed to bind control plane on port {http_port}"))?;
    info!(port = http_port, "control plane listening");

    let server = axum::serve(listener, router(state)).into_future();
    tokio::select! {
        result = server => {
            result.context("control plane server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, draining");
        }
    }

    app.shutdown().await;
    info!("shutdown complete");
    Ok(())
}
