//! Primary Heartbeat Reporter - runs alongside the primary's streaming
//! worker and periodically reports its health to the Fallback Monitor
//! (spec.md §4.7).
//!
//! The streaming worker itself (the actual encoding toolchain) is an
//! external collaborator (spec.md §2 "Out of scope"); this binary observes
//! it through a PID file and a camera reachability probe, then reports.

mod reporter;

use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::reporter::{channel, PrimaryStateSnapshot, ReporterConfig};

/// Primary Heartbeat Reporter - reports primary health to the fallback monitor.
#[derive(Parser, Debug)]
#[command(name = "primary-reporter")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the Fallback Monitor's ingress HTTP server.
    #[arg(long, env = "REPORTER_MONITOR_BASE_URL")]
    monitor_base_url: String,

    /// Bearer token presented to the monitor.
    #[arg(long, env = "REPORTER_TOKEN")]
    token: String,

    /// How often to POST a status report.
    #[arg(long, default_value_t = 20, env = "REPORTER_REPORT_INTERVAL_SECONDS")]
    report_interval_seconds: u64,

    /// Exponential backoff cap on transport/server failure.
    #[arg(long, default_value_t = 120, env = "REPORTER_MAX_BACKOFF_SECONDS")]
    max_backoff_seconds: u64,

    /// PID file written by the streaming worker; its existence and liveness
    /// determine `streamingActive`/`ffmpegRunning`.
    #[arg(long, env = "REPORTER_PID_FILE")]
    pid_file: Option<PathBuf>,

    /// Host to probe for camera network reachability.
    #[arg(long, env = "REPORTER_CAMERA_PING_HOST")]
    camera_ping_host: Option<String>,

    /// First hour (0-23, local time) of the configured streaming window.
    #[arg(long, default_value_t = 0, env = "REPORTER_DAY_WINDOW_START_HOUR")]
    day_window_start_hour: u32,

    /// First hour (0-23, local time) after the configured streaming window.
    #[arg(long, default_value_t = 24, env = "REPORTER_DAY_WINDOW_END_HOUR")]
    day_window_end_hour: u32,

    /// Local collector tick interval.
    #[arg(long, default_value_t = 5, env = "REPORTER_COLLECT_INTERVAL_SECONDS")]
    collect_interval_seconds: u64,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info", env = "REPORTER_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Primary Heartbeat Reporter v{}", env!("CARGO_PKG_VERSION"));

    let reporter_config = ReporterConfig {
        monitor_base_url: args.monitor_base_url,
        token: args.token,
        report_interval_seconds: args.report_interval_seconds,
        max_backoff_seconds: args.max_backoff_seconds,
    };

    let client = Client::new();
    let cancel = CancellationToken::new();

    let (publisher, receiver) = channel(PrimaryStateSnapshot::unknown(now_rfc3339()));

    let collector_cancel = cancel.clone();
    let collector = tokio::spawn(collect_local_state(
        publisher,
        args.pid_file,
        args.camera_ping_host,
        args.day_window_start_hour,
        args.day_window_end_hour,
        Duration::from_secs(args.collect_interval_seconds),
        collector_cancel,
    ));

    let reporter_cancel = cancel.clone();
    let reporter_task = tokio::spawn(reporter::run(reporter_config, client, receiver, reporter_cancel));

    shutdown_signal().await;
    log::info!("Shutdown signal received, stopping reporter");
    cancel.cancel();

    let _ = tokio::join!(collector, reporter_task);
}

/// Builds a fresh [`PrimaryStateSnapshot`] from locally observable signals
/// on a ticker and publishes it for the reporter to pick up (spec.md §4.7
/// step 1).
async fn collect_local_state(
    publisher: reporter::SnapshotPublisher,
    pid_file: Option<PathBuf>,
    camera_ping_host: Option<String>,
    day_window_start_hour: u32,
    day_window_end_hour: u32,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => return,
        }

        let streaming_active = pid_file.as_deref().map(pid_file_is_alive).unwrap_or(false);
        let camera_network_reachable = match &camera_ping_host {
            Some(host) => Some(probe_host_reachable(host).await),
            None => None,
        };

        let snapshot = PrimaryStateSnapshot {
            reported_at: now_rfc3339(),
            streaming_active,
            ffmpeg_running: streaming_active,
            day_window_active: is_within_day_window(day_window_start_hour, day_window_end_hour),
            camera_signal_available: None,
            camera_network_reachable,
            last_error: None,
            config: None,
        };

        publisher.publish(snapshot);
    }
}

/// Reads a PID file and checks whether that process is still alive via
/// `kill(pid, 0)`, the conventional liveness probe.
#[cfg(unix)]
fn pid_file_is_alive(path: &std::path::Path) -> bool {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return false;
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        return false;
    };
    // Safety: signal 0 sends no signal, only checks existence/permission.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_file_is_alive(_path: &std::path::Path) -> bool {
    false
}

async fn probe_host_reachable(host: &str) -> bool {
    let target = if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:80")
    };
    let Ok(mut addrs) = target.to_socket_addrs() else {
        return false;
    };
    let Some(addr) = addrs.next() else {
        return false;
    };
    tokio::time::timeout(Duration::from_secs(5), tokio::net::TcpStream::connect(addr))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

fn is_within_day_window(start_hour: u32, end_hour: u32) -> bool {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let hour_of_day = (now_secs / 3600) % 24;
    (start_hour as u64..end_hour as u64).contains(&hour_of_day)
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

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
