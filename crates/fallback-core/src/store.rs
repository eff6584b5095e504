//! Heartbeat Record Store (spec.md §4.1, component C1).
//!
//! An in-memory time-ordered ring buffer of recent heartbeat reports,
//! mirrored to a single JSON file after every mutation. Readers always see
//! a consistent snapshot; persistence is best-effort and never surfaces as
//! a fatal error to the caller (spec.md §7: `PersistenceFailure`).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::model::HeartbeatReport;

/// Returns the current time as milliseconds since the Unix epoch.
///
/// Used only for the `receivedAt` stamp and logging; the decision engine
/// itself measures elapsed time against a monotonic `Instant` (see
/// `decision.rs`), per spec.md §5 ("the decision loop sees a monotonic
/// timestamp source; wall-clock jumps do not affect it").
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct StoreInner {
    records: Vec<HeartbeatReport>,
}

/// Ordered, bounded, age-evicting buffer of recent heartbeat reports.
pub struct HeartbeatStore {
    inner: RwLock<StoreInner>,
    state_file_path: PathBuf,
    history_window_seconds: u64,
    max_records: usize,
}

impl HeartbeatStore {
    /// Creates a new, empty store. Call [`HeartbeatStore::load`] afterward
    /// to populate it from the on-disk mirror, if any.
    #[must_use]
    pub fn new(
        state_file_path: impl Into<PathBuf>,
        history_window_seconds: u64,
        max_records: usize,
    ) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                records: Vec::new(),
            }),
            state_file_path: state_file_path.into(),
            history_window_seconds,
            max_records,
        }
    }

    /// Reads the JSON mirror file at startup. A missing file or a parse
    /// failure is treated as "empty" without error (spec.md §4.1).
    pub fn load(&self) {
        let records = match std::fs::read_to_string(&self.state_file_path) {
            Ok(contents) => match serde_json::from_str::<Vec<HeartbeatReport>>(&contents) {
                Ok(records) => records,
                Err(e) => {
                    log::debug!(
                        "[Store] state file {} is not valid JSON, starting empty: {}",
                        self.state_file_path.display(),
                        e
                    );
                    Vec::new()
                }
            },
            Err(e) => {
                log::debug!(
                    "[Store] no state file at {} ({}), starting empty",
                    self.state_file_path.display(),
                    e
                );
                Vec::new()
            }
        };

        let mut inner = self.inner.write();
        inner.records = records;
        self.evict_locked(&mut inner, now_millis());
    }

    /// Inserts a report in arrival order, evicts by age and by count, and
    /// flushes the result to disk. Returns the `receivedAt` stamp assigned
    /// to the report.
    pub fn append(&self, mut report: HeartbeatReport) -> u64 {
        let received_at = now_millis();
        report.received_at = received_at;

        let mut inner = self.inner.write();
        inner.records.push(report);
        self.evict_locked(&mut inner, received_at);

        if let Err(e) = self.flush_locked(&inner) {
            log::warn!(
                "[Store] failed to persist state file {}: {}",
                self.state_file_path.display(),
                e
            );
        }

        received_at
    }

    /// Returns an immutable copy of the current window, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<HeartbeatReport> {
        self.inner.read().records.clone()
    }

    /// Returns the most recent report, if any.
    #[must_use]
    pub fn latest(&self) -> Option<HeartbeatReport> {
        self.inner.read().records.last().cloned()
    }

    /// Returns whether the store currently holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Evicts records older than `historyWindowSeconds` and, if still over
    /// `maxRecords`, drops the oldest until the count fits. Called on every
    /// insert and should also be called once per decision tick so the
    /// window stays accurate even without new arrivals.
    pub fn evict(&self, now_ms: u64) {
        let mut inner = self.inner.write();
        self.evict_locked(&mut inner, now_ms);
    }

    fn evict_locked(&self, inner: &mut StoreInner, now_ms: u64) {
        let window_ms = self.history_window_seconds.saturating_mul(1000);
        inner.records.retain(|r| {
            // Inclusive at the boundary: a record exactly `window` old is
            // still retained (spec.md §8: "treated as still fresh").
            now_ms.saturating_sub(r.received_at) <= window_ms
        });

        if inner.records.len() > self.max_records {
            let excess = inner.records.len() - self.max_records;
            inner.records.drain(0..excess);
        }
    }

    fn flush_locked(&self, inner: &StoreInner) -> std::io::Result<()> {
        atomic_write_json(&self.state_file_path, &inner.records)
    }

    /// Inserts a report with a caller-chosen `receivedAt`, bypassing the
    /// `now_millis()` stamp. Used by `decision.rs` tests to exercise age-based
    /// thresholds without sleeping in real time.
    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, report: HeartbeatReport) {
        let mut inner = self.inner.write();
        inner.records.push(report);
    }
}

/// Serializes `value` and writes it to `path` atomically (write to a
/// sibling temp file, then rename), matching the teacher's
/// `ManualSpeakerConfig::save` idiom (spec.md §5: "written atomically").
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let contents = serde_json::to_string_pretty(value)?;
    let mut temp_path = path.to_path_buf();
    let file_name = temp_path
        .file_name()
        .map(|n| format!("{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| "state.json.tmp".to_string());
    temp_path.set_file_name(file_name);

    std::fs::write(&temp_path, contents)?;
    std::fs::rename(&temp_path, path)
}

/// Writes `contents` to `path` atomically as plain text. Shared by the
/// slate encoder's progress file and fallback-mode file.
pub fn atomic_write_text(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp_path = path.to_path_buf();
    let file_name = temp_path
        .file_name()
        .map(|n| format!("{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| "file.tmp".to_string());
    temp_path.set_file_name(file_name);

    std::fs::write(&temp_path, contents)?;
    std::fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn report(streaming_active: bool) -> HeartbeatReport {
        HeartbeatReport {
            received_at: 0,
            reported_at: None,
            streaming_active,
            ffmpeg_running: streaming_active,
            day_window_active: true,
            camera_signal_available: Some(true),
            camera_network_reachable: Some(true),
            last_error: None,
            source_address: "127.0.0.1".into(),
            config: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn append_assigns_received_at_and_is_visible_in_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeartbeatStore::new(dir.path().join("state.json"), 300, 100);
        let received_at = store.append(report(true));
        assert!(received_at > 0);
        let snap = store.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].received_at, received_at);
    }

    #[test]
    fn latest_returns_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeartbeatStore::new(dir.path().join("state.json"), 300, 100);
        store.append(report(true));
        store.append(report(false));
        assert_eq!(store.latest().unwrap().streaming_active, false);
    }

    #[test]
    fn max_records_keeps_most_recent_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeartbeatStore::new(dir.path().join("state.json"), 300, 3);
        for i in 0..5 {
            store.append(report(i % 2 == 0));
        }
        let snap = store.snapshot();
        assert_eq!(snap.len(), 3);
        // Arrival order preserved: the last 3 inserted were (true, false, true)
        assert_eq!(
            snap.iter().map(|r| r.streaming_active).collect::<Vec<_>>(),
            vec![true, false, true]
        );
    }

    #[test]
    fn load_with_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeartbeatStore::new(dir.path().join("does_not_exist.json"), 300, 100);
        store.load();
        assert!(store.is_empty());
    }

    #[test]
    fn load_with_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = HeartbeatStore::new(path, 300, 100);
        store.load();
        assert!(store.is_empty());
    }

    #[test]
    fn persisted_state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = HeartbeatStore::new(&path, 300, 100);
            store.append(report(true));
        }
        let reloaded = HeartbeatStore::new(&path, 300, 100);
        reloaded.load();
        assert_eq!(reloaded.snapshot().len(), 1);
    }

    #[test]
    fn evict_drops_records_older_than_history_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeartbeatStore::new(dir.path().join("state.json"), 10, 100);
        let mut old = report(true);
        old.received_at = 0;
        store.inner.write().records.push(old);

        // 10_001 ms > 10s window -> evicted
        store.evict(10_001);
        assert!(store.is_empty());
    }

    #[test]
    fn evict_keeps_record_exactly_at_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeartbeatStore::new(dir.path().join("state.json"), 10, 100);
        let mut old = report(true);
        old.received_at = 0;
        store.inner.write().records.push(old);

        // Exactly 10s old is still retained (inclusive boundary, spec.md §8)
        store.evict(10_000);
        assert_eq!(store.snapshot().len(), 1);
    }
}
