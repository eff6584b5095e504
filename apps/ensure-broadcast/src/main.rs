//! Ensure-Broadcast Probe (spec.md §4.8, component C8): a one-shot check,
//! run by a scheduled timer, that the configured stream is currently bound
//! to an eligible broadcast on the video platform. Never interacts with C3.

use clap::Parser;
use fallback_core::recovery_probe::{ensure_broadcast, EnsureBroadcastExit, PlatformClient};

/// Ensure-Broadcast Probe - verifies the configured stream has an eligible broadcast.
#[derive(Parser, Debug)]
#[command(name = "ensure-broadcast")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the video platform's REST API.
    #[arg(long, env = "ENSURE_BROADCAST_PLATFORM_BASE_URL")]
    platform_base_url: String,

    /// Path to the cached OAuth refresh token file.
    #[arg(long, env = "ENSURE_BROADCAST_TOKEN_FILE")]
    token_file: std::path::PathBuf,

    /// The stream identifier to check for an eligible binding.
    #[arg(long, env = "ENSURE_BROADCAST_STREAM_ID")]
    stream_id: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info", env = "ENSURE_BROADCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    let client = PlatformClient::new(args.platform_base_url, args.token_file);
    let exit = ensure_broadcast(&client, &args.stream_id).await;

    match exit {
        EnsureBroadcastExit::Success => {
            log::info!("[ensure-broadcast] stream {} is bound to an eligible broadcast", args.stream_id);
        }
        EnsureBroadcastExit::NoBroadcast => {
            log::warn!("[ensure-broadcast] no eligible broadcast bound to stream {}", args.stream_id);
        }
        EnsureBroadcastExit::WrongBinding => {
            log::warn!("[ensure-broadcast] stream {} is bound to an ineligible broadcast", args.stream_id);
        }
        EnsureBroadcastExit::ApiError => {
            log::error!("[ensure-broadcast] platform API error while checking stream {}", args.stream_id);
        }
        EnsureBroadcastExit::Unexpected => {
            log::error!("[ensure-broadcast] unexpected failure while checking stream {}", args.stream_id);
        }
    }

    std::process::exit(exit as i32);
}
