//! Encoder child process lifecycle: launch, scene-duration timeout, signal
//! forwarding, and drained stdout/stderr (spec.md §4.6 steps 4-5, 7).
//!
//! Grounded on the corpus's ffmpeg-wrapper idiom (piped output drained by
//! spawned tasks, bounded wait before escalating to a hard kill) adapted to
//! `tokio::process::Command` rather than a thread-per-process model.

use std::process::Stdio;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fallback_core::model::{EncoderProfile, Scene, SlateMode};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressTracker;

/// Cooperative shutdown signal: a [`CancellationToken`] plus the actual
/// signal number that triggered it, so the child can be stopped with the
/// same signal the runner itself received (spec.md §4.6 step 5).
#[derive(Clone)]
pub struct ShutdownSignal {
    token: CancellationToken,
    received: Arc<AtomicI32>,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            received: Arc::new(AtomicI32::new(libc::SIGTERM)),
        }
    }

    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Records which signal fired and cancels the token.
    pub fn trigger(&self, signal: i32) {
        self.received.store(signal, Ordering::SeqCst);
        self.token.cancel();
    }

    fn signal(&self) -> i32 {
        self.received.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// How a scene run ended.
#[derive(Debug)]
pub enum SceneOutcome {
    /// The scene's configured duration elapsed; the child was asked to stop
    /// and did. Move on to the next scene immediately.
    RotatedOnSchedule,
    /// The child exited on its own (status 0 or a non-signal error) before
    /// its duration elapsed. Caller should wait `retryDelaySeconds` and
    /// relaunch with the next scene.
    ExitedEarly,
    /// A shutdown signal arrived. The child was forwarded the signal and
    /// reaped; the runner should exit with this code.
    ShutdownRequested(i32),
}

/// Tunables that aren't part of [`EncoderProfile`] because they govern the
/// runner's own behavior, not the encoded output (spec.md §4.6 steps 5, 7).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub ffmpeg_binary: String,
    pub child_wait_timeout_seconds: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_binary: "ffmpeg".to_string(),
            child_wait_timeout_seconds: 5,
        }
    }
}

/// Builds the ffmpeg-style argument list for one scene.
///
/// A scene source that resolves to an existing local path is looped as
/// file input; anything else is treated as an `lavfi` synthetic source
/// specification consumed directly by the filter graph (spec.md §4.6
/// "Scene rotation").
pub fn build_args(profile: &EncoderProfile, scene: &Scene) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    args.push("-y".to_string());

    if std::path::Path::new(&scene.source).exists() {
        args.push("-stream_loop".to_string());
        args.push("-1".to_string());
        args.push("-re".to_string());
        args.push("-i".to_string());
        args.push(scene.source.clone());
    } else {
        args.push("-f".to_string());
        args.push("lavfi".to_string());
        args.push("-i".to_string());
        args.push(scene.source.clone());
    }

    let mode_label = match profile.mode {
        SlateMode::Life => "LIFE",
        SlateMode::Smpte => "SMPTE BARS",
    };
    let mut filter = format!(
        "scale={}:{},fps={}",
        profile.width, profile.height, profile.fps
    );
    for text in &profile.overlay_texts {
        filter.push_str(&format!(",drawtext=text='{}'", escape_drawtext(text)));
    }
    filter.push_str(&format!(",drawtext=text='{}'", mode_label));
    args.push("-vf".to_string());
    args.push(filter);

    args.push("-c:v".to_string());
    args.push("libx264".to_string());
    args.push("-preset".to_string());
    args.push(profile.preset.clone());
    args.push("-b:v".to_string());
    args.push(format!("{}k", profile.video_bitrate_kbps));
    args.push("-c:a".to_string());
    args.push("aac".to_string());
    args.push("-b:a".to_string());
    args.push(format!("{}k", profile.audio_bitrate_kbps));
    args.push("-g".to_string());
    args.push((profile.keyframe_interval_seconds * profile.fps).to_string());
    args.push("-t".to_string());
    args.push(scene.duration_seconds.to_string());

    args.push("-progress".to_string());
    args.push("pipe:2".to_string());

    args.push("-f".to_string());
    args.push("flv".to_string());
    args.push(profile.target_url.clone());

    args
}

fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\").replace(':', "\\:").replace('\'', "\\'")
}

/// Launches and supervises the child for a single scene. Drains stdout
/// (logged verbatim) and stderr (parsed for `-progress` key=value lines,
/// also logged at debug level), and races the child's own exit against the
/// scene's configured duration and any pending shutdown signal.
pub async fn run_scene(
    config: &RunnerConfig,
    profile: &EncoderProfile,
    scene: &Scene,
    tracker: &ProgressTracker,
    shutdown: &ShutdownSignal,
) -> std::io::Result<SceneOutcome> {
    tracker.reset();
    let args = build_args(profile, scene);
    log::info!("[slate-encoder] launching scene {}: {:?}", scene.source, args);

    let mut child = Command::new(&config.ffmpeg_binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("[slate-encoder] stdout: {line}");
        }
    });

    let tracker_for_stderr = tracker.clone();
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracker_for_stderr.update_from_line(&line);
            log::debug!("[slate-encoder] stderr: {line}");
        }
    });

    let duration = Duration::from_secs(u64::from(scene.duration_seconds));

    let outcome = tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) if status.success() => SceneOutcome::ExitedEarly,
                Ok(_status) => SceneOutcome::ExitedEarly,
                Err(e) => return Err(e),
            }
        }
        () = tokio::time::sleep(duration) => {
            terminate_child(&mut child, config.child_wait_timeout_seconds, libc::SIGTERM).await?;
            SceneOutcome::RotatedOnSchedule
        }
        () = shutdown.cancelled() => {
            let code = terminate_child(&mut child, config.child_wait_timeout_seconds, shutdown.signal()).await?;
            SceneOutcome::ShutdownRequested(code)
        }
    };

    let _ = stdout_task.await;
    let _ = stderr_task.await;

    Ok(outcome)
}

/// Forwards `signal` to the child, waits up to `timeout_seconds` for it to
/// exit, and escalates to `SIGKILL` if it hasn't (spec.md §4.6 step 5:
/// "forwards the signal ... waits ... with a bounded timeout").
///
/// Returns the conventional `128 + signal` shell exit code so the service
/// manager can see which signal caused the stop.
async fn terminate_child(
    child: &mut Child,
    timeout_seconds: u64,
    signal: i32,
) -> std::io::Result<i32> {
    if let Some(pid) = child.id() {
        // Safety: `pid` is the child's own PID, valid as long as it hasn't
        // been reaped; forwarding a terminate-class signal to it is the
        // documented mechanism for stopping the supervised process.
        unsafe {
            libc::kill(pid as i32, signal);
        }
    }

    let wait_result = tokio::time::timeout(Duration::from_secs(timeout_seconds), child.wait()).await;
    match wait_result {
        Ok(_) => {}
        Err(_) => {
            log::warn!("[slate-encoder] child did not exit within {timeout_seconds}s, sending SIGKILL");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    Ok(128 + signal)
}
