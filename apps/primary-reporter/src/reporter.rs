//! Primary Heartbeat Reporter (spec.md §4.7, component C7): periodically
//! snapshots the streaming worker's local state and POSTs it to the
//! monitor, decoupled from the worker via a non-blocking `watch` channel so
//! a slow or unreachable monitor never stalls streaming.
//!
//! Grounded on the corpus's heartbeat/backoff idiom
//! (`examples/other_examples/..._heartbeat.rs.rs`: `HeartbeatConfig`'s
//! doubling-with-cap backoff fields, `tokio::select!` interval-vs-shutdown
//! loop) combined with the teacher's shared-`reqwest::Client` convention
//! from `recovery_probe.rs`.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The exact wire shape of `POST /status` (spec.md §6).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryStateSnapshot {
    pub reported_at: String,
    pub streaming_active: bool,
    pub ffmpeg_running: bool,
    pub day_window_active: bool,
    pub camera_signal_available: Option<bool>,
    pub camera_network_reachable: Option<bool>,
    pub last_error: Option<String>,
    pub config: Option<serde_json::Value>,
}

impl PrimaryStateSnapshot {
    /// A conservative initial snapshot used before the streaming worker has
    /// published its first real one.
    #[must_use]
    pub fn unknown(reported_at: impl Into<String>) -> Self {
        Self {
            reported_at: reported_at.into(),
            streaming_active: false,
            ffmpeg_running: false,
            day_window_active: false,
            camera_signal_available: None,
            camera_network_reachable: None,
            last_error: None,
            config: None,
        }
    }
}

/// Publishing half of the snapshot channel, held by the streaming worker.
/// `publish` never blocks: a `watch` channel always holds only the latest
/// value (spec.md §4.7: "never blocks the streaming worker ... uses
/// non-blocking queues").
#[derive(Clone)]
pub struct SnapshotPublisher(watch::Sender<PrimaryStateSnapshot>);

impl SnapshotPublisher {
    pub fn publish(&self, snapshot: PrimaryStateSnapshot) {
        // A `SendError` only occurs once every receiver has been dropped,
        // i.e. the reporter task has already shut down; nothing to do.
        let _ = self.0.send(snapshot);
    }
}

/// Creates the snapshot channel, returning the worker-side publisher and the
/// reporter-side receiver.
#[must_use]
pub fn channel(initial: PrimaryStateSnapshot) -> (SnapshotPublisher, watch::Receiver<PrimaryStateSnapshot>) {
    let (tx, rx) = watch::channel(initial);
    (SnapshotPublisher(tx), rx)
}

/// Configuration for the reporting loop (spec.md §4.7, §6).
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    pub monitor_base_url: String,
    pub token: String,
    pub report_interval_seconds: u64,
    pub max_backoff_seconds: u64,
}

/// Timeout for a single POST, per spec.md §5 ("every outbound network call
/// ... has an explicit deadline (<= 10s)").
const REPORT_TIMEOUT: Duration = Duration::from_secs(10);

enum PostOutcome {
    Accepted,
    Unauthorized,
    OtherStatus(StatusCode),
}

async fn post_snapshot(
    client: &Client,
    config: &ReporterConfig,
    snapshot: &PrimaryStateSnapshot,
) -> Result<PostOutcome, reqwest::Error> {
    let url = format!("{}/status", config.monitor_base_url.trim_end_matches('/'));
    let response = client
        .post(url)
        .bearer_auth(&config.token)
        .json(snapshot)
        .timeout(REPORT_TIMEOUT)
        .send()
        .await?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        Ok(PostOutcome::Unauthorized)
    } else if status.is_success() {
        Ok(PostOutcome::Accepted)
    } else {
        Ok(PostOutcome::OtherStatus(status))
    }
}

/// Runs the reporting loop until `cancel` fires. Applies exponential
/// backoff (doubling, capped at `maxBackoffSeconds`) on transport failure
/// and on non-2xx/non-401 responses; resets to the configured interval on
/// success; leaves the interval unchanged on 401 (spec.md §4.7 step 4).
pub async fn run(
    config: ReporterConfig,
    client: Client,
    mut snapshots: watch::Receiver<PrimaryStateSnapshot>,
    cancel: CancellationToken,
) {
    let base_interval = Duration::from_secs(config.report_interval_seconds.max(1));
    let max_backoff = Duration::from_secs(config.max_backoff_seconds.max(config.report_interval_seconds));
    let mut delay = base_interval;

    loop {
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => {
                log::info!("[primary-reporter] shutting down");
                return;
            }
        }

        let snapshot = snapshots.borrow_and_update().clone();
        match post_snapshot(&client, &config, &snapshot).await {
            Ok(PostOutcome::Accepted) => {
                delay = base_interval;
            }
            Ok(PostOutcome::Unauthorized) => {
                log::warn!("[primary-reporter] monitor rejected token (401), retrying at normal interval");
            }
            Ok(PostOutcome::OtherStatus(status)) => {
                log::warn!("[primary-reporter] monitor returned {status}, backing off");
                delay = (delay * 2).min(max_backoff);
            }
            Err(e) => {
                log::warn!("[primary-reporter] transport failure posting status: {e}");
                delay = (delay * 2).min(max_backoff);
            }
        }
    }
}
