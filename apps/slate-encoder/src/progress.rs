//! Progress file writer (spec.md §4.6 step 6): `frame`, `fps`, `bitrate`,
//! `dropped`, `bytesOut`, `outTime`, written atomically on a ticker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fallback_core::store::atomic_write_text;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Latest known encoder progress, updated by parsing the child's `-progress`
/// output lines as they're drained from stdout.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub frame: u64,
    pub fps: f64,
    pub bitrate_kbps: f64,
    pub dropped: u64,
    pub bytes_out: u64,
    pub out_time_seconds: f64,
}

impl ProgressSnapshot {
    fn to_text(&self) -> String {
        format!(
            "frame={}\nfps={:.2}\nbitrate={:.2}\ndropped={}\nbytesOut={}\noutTime={:.2}\n",
            self.frame, self.fps, self.bitrate_kbps, self.dropped, self.bytes_out, self.out_time_seconds
        )
    }
}

/// Shared, mutation-friendly handle to the current progress snapshot.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Mutex<ProgressSnapshot>>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProgressSnapshot::default())),
        }
    }

    /// Resets the snapshot to defaults. Called at the start of each scene so
    /// stale numbers from the previous child don't linger.
    pub fn reset(&self) {
        *self.inner.lock() = ProgressSnapshot::default();
    }

    /// Parses a single `key=value` line from the child's progress pipe and
    /// merges recognized keys into the snapshot. Unknown keys are ignored.
    pub fn update_from_line(&self, line: &str) {
        let Some((key, value)) = line.split_once('=') else {
            return;
        };
        let key = key.trim();
        let value = value.trim();

        let mut snapshot = self.inner.lock();
        match key {
            "frame" => {
                if let Ok(v) = value.parse() {
                    snapshot.frame = v;
                }
            }
            "fps" => {
                if let Ok(v) = value.parse() {
                    snapshot.fps = v;
                }
            }
            "bitrate" => {
                // ffmpeg emits e.g. "1234.5kbits/s" or "N/A".
                let numeric: String = value.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
                if let Ok(v) = numeric.parse() {
                    snapshot.bitrate_kbps = v;
                }
            }
            "drop_frames" => {
                if let Ok(v) = value.parse() {
                    snapshot.dropped = v;
                }
            }
            "total_size" => {
                if let Ok(v) = value.parse() {
                    snapshot.bytes_out = v;
                }
            }
            "out_time_ms" => {
                if let Ok(v) = value.parse::<u64>() {
                    snapshot.out_time_seconds = v as f64 / 1_000_000.0;
                }
            }
            _ => {}
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner.lock().clone()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns a ticker that writes `tracker`'s current snapshot to `path` every
/// `interval`, until `cancel` fires. Matches spec.md §5: "the progress file
/// ... written atomically (write-to-temp + rename)".
pub fn spawn_ticker(
    tracker: ProgressTracker,
    path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let text = tracker.snapshot().to_text();
                    if let Err(e) = atomic_write_text(&path, &text) {
                        log::warn!("[Progress] failed to write {}: {}", path.display(), e);
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_progress_keys() {
        let tracker = ProgressTracker::new();
        tracker.update_from_line("frame=120");
        tracker.update_from_line("fps=29.97");
        tracker.update_from_line("bitrate=1500.2kbits/s");
        tracker.update_from_line("drop_frames=3");
        tracker.update_from_line("total_size=884736");
        tracker.update_from_line("out_time_ms=5000000");

        let snap = tracker.snapshot();
        assert_eq!(snap.frame, 120);
        assert!((snap.fps - 29.97).abs() < 0.01);
        assert!((snap.bitrate_kbps - 1500.2).abs() < 0.01);
        assert_eq!(snap.dropped, 3);
        assert_eq!(snap.bytes_out, 884736);
        assert!((snap.out_time_seconds - 5.0).abs() < 0.01);
    }

    #[test]
    fn ignores_unknown_and_malformed_lines() {
        let tracker = ProgressTracker::new();
        tracker.update_from_line("progress=continue");
        tracker.update_from_line("not a key value line");
        let snap = tracker.snapshot();
        assert_eq!(snap.frame, 0);
    }

    #[test]
    fn reset_clears_previous_values() {
        let tracker = ProgressTracker::new();
        tracker.update_from_line("frame=500");
        tracker.reset();
        assert_eq!(tracker.snapshot().frame, 0);
    }
}
