//! Fallback Monitor - the heartbeat-driven fallback controller server.
//!
//! Receives periodic heartbeat reports from the primary encoder, evaluates
//! primary health with hysteresis, and drives the slate encoder supervisor
//! accordingly.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fallback_core::bootstrap_services;
use tokio::signal;

use crate::config::MonitorConfig;

/// Fallback Monitor - heartbeat-driven fallback controller.
#[derive(Parser, Debug)]
#[command(name = "fallback-monitor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "FALLBACK_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "FALLBACK_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is loaded before the logger is initialized so a configured
    // `log_file_path` can redirect the logger's target before anything logs.
    let mut config =
        MonitorConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.port = port;
    }

    init_logger(args.log_level, config.log_file_path.as_deref())?;

    log::info!("Fallback Monitor v{}", env!("CARGO_PKG_VERSION"));

    log::info!(
        "Configuration: bind={}, port={}, secondaryUnit={}",
        config.bind,
        config.port,
        config.secondary_unit
    );

    let addr = SocketAddr::new(config.bind, config.port);
    let bootstrap_config = config.to_bootstrap_config();
    let services = bootstrap_services(bootstrap_config);

    log::info!("Services bootstrapped successfully");

    let engine = services.engine.clone();
    let spawner = services.spawner.clone();
    let engine_task = tokio::spawn(async move {
        engine.run(spawner).await;
    });

    let router = fallback_core::api::http::create_router(services.app_state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    log::info!("Ingress HTTP server listening on {addr}");

    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        log::error!("Server error: {e}");
    }

    log::info!("Shutdown signal received, cleaning up...");
    services.shutdown();

    // Give the decision engine's current tick up to 5s to finish
    // (spec.md §5: "in-flight requests are given up to 5s to drain").
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), engine_task).await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Initializes the logger, redirecting to `log_file_path` (opened for append,
/// created if missing) when configured, and to stderr otherwise.
fn init_logger(log_level: log::LevelFilter, log_file_path: Option<&std::path::Path>) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level).format_timestamp_millis();

    if let Some(path) = log_file_path {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
