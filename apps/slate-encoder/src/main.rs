//! Slate Encoder Runner - supervises the synthetic fallback encoder child:
//! scene rotation, signal forwarding, and progress reporting (spec.md §4.6).

mod process;
mod profile;
mod progress;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fallback_core::model::SlateMode;

use crate::process::{RunnerConfig, SceneOutcome, ShutdownSignal};
use crate::profile::build_profile;
use crate::progress::ProgressTracker;

/// Slate Encoder Runner - supervises the fallback slate encoder child.
#[derive(Parser, Debug)]
#[command(name = "slate-encoder")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML scene/output profile.
    #[arg(long, value_name = "FILE", env = "SLATE_PROFILE_FILE")]
    profile_file: PathBuf,

    /// Path to the shell-style `KEY=VALUE` stream-key file.
    #[arg(long, value_name = "FILE", env = "SLATE_KEY_FILE")]
    key_file: PathBuf,

    /// Path to the single-line fallback-mode file (`life` or `smpte`).
    #[arg(long, value_name = "FILE", env = "SLATE_MODE_FILE")]
    mode_file: PathBuf,

    /// Path the progress file is written to.
    #[arg(long, value_name = "FILE", env = "SLATE_PROGRESS_FILE")]
    progress_file: PathBuf,

    /// Default fallback mode used when the mode file is missing or unknown.
    #[arg(long, default_value = "life", env = "SLATE_DEFAULT_MODE")]
    default_mode: String,

    /// Path to the ffmpeg-compatible encoder binary.
    #[arg(long, default_value = "ffmpeg", env = "SLATE_FFMPEG_BINARY")]
    ffmpeg_binary: String,

    /// Seconds to wait after forwarding a signal before escalating to SIGKILL.
    #[arg(long, default_value_t = 5, env = "SLATE_CHILD_WAIT_TIMEOUT_SECONDS")]
    child_wait_timeout_seconds: u64,

    /// Seconds to wait before relaunching after the child exits on its own.
    #[arg(long, default_value_t = 10, env = "SLATE_RETRY_DELAY_SECONDS")]
    retry_delay_seconds: u64,

    /// Progress file write interval, in seconds.
    #[arg(long, default_value_t = 30, env = "SLATE_PROGRESS_INTERVAL_SECONDS")]
    progress_interval_seconds: u64,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info", env = "SLATE_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Slate Encoder Runner v{}", env!("CARGO_PKG_VERSION"));

    let default_mode = SlateMode::parse_or_default(&args.default_mode, SlateMode::Life);

    // spec.md §7: ConfigurationInvalid at start exits with a non-zero code
    // so the service manager surfaces the failure immediately.
    let profile = match build_profile(&args.profile_file, &args.key_file, &args.mode_file, default_mode) {
        Ok(profile) => profile,
        Err(e) => {
            log::error!("Configuration invalid: {e}");
            std::process::exit(1);
        }
    };

    if profile.scenes.is_empty() {
        log::error!("Configuration invalid: scene list is empty");
        std::process::exit(1);
    }

    let shutdown = ShutdownSignal::new();
    tokio::spawn(listen_for_shutdown_signals(shutdown.clone()));

    let tracker = ProgressTracker::new();
    let ticker = progress::spawn_ticker(
        tracker.clone(),
        args.progress_file,
        Duration::from_secs(args.progress_interval_seconds),
        shutdown.token(),
    );

    let runner_config = RunnerConfig {
        ffmpeg_binary: args.ffmpeg_binary,
        child_wait_timeout_seconds: args.child_wait_timeout_seconds,
    };

    let exit_code = run_rotation(&runner_config, &profile, &tracker, &shutdown, args.retry_delay_seconds).await;

    shutdown.token().cancel();
    let _ = ticker.await;

    std::process::exit(exit_code);
}

/// Cycles the scene list indefinitely, relaunching per spec.md §4.6 steps
/// 4 and 7, until a shutdown signal is observed.
async fn run_rotation(
    runner_config: &RunnerConfig,
    profile: &fallback_core::model::EncoderProfile,
    tracker: &ProgressTracker,
    shutdown: &ShutdownSignal,
    retry_delay_seconds: u64,
) -> i32 {
    let mut scene_index = 0usize;

    loop {
        if shutdown.is_cancelled() {
            return 0;
        }

        let scene = &profile.scenes[scene_index % profile.scenes.len()];
        let outcome = process::run_scene(runner_config, profile, scene, tracker, shutdown).await;

        match outcome {
            Ok(SceneOutcome::RotatedOnSchedule) => {
                scene_index = scene_index.wrapping_add(1);
            }
            Ok(SceneOutcome::ExitedEarly) => {
                log::warn!(
                    "[slate-encoder] child for scene {} exited before its duration elapsed, retrying in {}s",
                    scene.source,
                    retry_delay_seconds
                );
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_secs(retry_delay_seconds)) => {}
                    () = shutdown.cancelled() => return 0,
                }
                scene_index = scene_index.wrapping_add(1);
            }
            Ok(SceneOutcome::ShutdownRequested(code)) => {
                return code;
            }
            Err(e) => {
                log::error!("[slate-encoder] failed to launch encoder child: {e}");
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_secs(retry_delay_seconds)) => {}
                    () = shutdown.cancelled() => return 0,
                }
            }
        }
    }
}

/// Installs handlers for the standard termination signals and records which
/// one fired (spec.md §4.6 step 5: "exits with the same signal code").
#[cfg(unix)]
async fn listen_for_shutdown_signals(shutdown: ShutdownSignal) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut hup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    let signal_number = tokio::select! {
        _ = term.recv() => { log::info!("[slate-encoder] received SIGTERM"); libc::SIGTERM }
        _ = int.recv() => { log::info!("[slate-encoder] received SIGINT"); libc::SIGINT }
        _ = hup.recv() => { log::info!("[slate-encoder] received SIGHUP"); libc::SIGHUP }
    };

    shutdown.trigger(signal_number);
}

#[cfg(not(unix))]
async fn listen_for_shutdown_signals(shutdown: ShutdownSignal) {
    let _ = tokio::signal::ctrl_c().await;
    shutdown.trigger(libc::SIGTERM);
}
