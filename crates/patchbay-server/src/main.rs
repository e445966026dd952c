//! Patchbay server - HTTP/WebSocket surface over the pty session engine.

use anyhow::Result;
use clap::Parser;
use patchbay_server::{config::Config, logging, routes, state::AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use logging::{LogConfig, LogFormat};

/// Patchbay server - pty session multiplexer.
#[derive(Parser, Debug)]
#[command(name = "patchbay-server")]
#[command(about = "HTTP/WebSocket server multiplexing pty sessions")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override bind host from config
    #[arg(long)]
    host: Option<String>,

    /// Override port from config
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging (INFO level for most targets)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging (DEBUG level, excludes ping traces)
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (TRACE level for everything)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "engine=debug" or "ws::ping=trace")
    /// Can be specified multiple times. Targets are prefixed with "patchbay::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // CLI overrides beat the config file.
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    tracing::info!(
        target: "patchbay::startup",
        "Loaded configuration ({}:{}, watermarks {}/{})",
        config.host,
        config.port,
        config.engine.high_watermark_bytes,
        config.engine.low_watermark_bytes
    );

    let state = Arc::new(AppState::new(config.clone()));
    tracing::info!(target: "patchbay::startup", "Initialized session engine");

    let app = routes::app_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(target: "patchbay::startup", "Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Sessions outlive their sockets; close them before exiting so
    // children are reaped deterministically.
    tracing::info!(target: "patchbay::startup", "Shutting down");
    state.engine.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "patchbay::startup", "ctrl-c handler failed: {}", e);
    }
}
