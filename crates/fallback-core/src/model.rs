//! Wire and persisted data types shared across the fallback controller.
//!
//! Mirrors the teacher's plain-struct-plus-derive style (`state.rs`'s
//! `Config`/`StreamingConfig`): data definitions here, behavior in the
//! modules that own it (`store.rs`, `decision.rs`, `supervisor.rs`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A single status snapshot received from the primary.
///
/// Unknown fields sent by the primary are preserved verbatim in `extra` so
/// the wire format stays forward-compatible (spec.md §9: "dynamic
/// dictionaries on the wire").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReport {
    /// Monotonic timestamp (milliseconds) set by the ingress server on
    /// arrival. Authoritative for all timing decisions.
    #[serde(skip_deserializing, default)]
    pub received_at: u64,

    /// Wall-clock timestamp reported by the primary. Advisory only.
    #[serde(default)]
    pub reported_at: Option<String>,

    /// Whether the primary's encoder child is alive.
    pub streaming_active: bool,

    /// Whether the primary's ffmpeg child is alive.
    #[serde(default)]
    pub ffmpeg_running: bool,

    /// Whether the primary considers itself inside its configured streaming
    /// window (e.g. daylight hours for an outdoor camera).
    #[serde(default)]
    pub day_window_active: bool,

    /// Whether the primary's camera probe succeeded recently. `None` means
    /// unknown (the primary doesn't run a camera probe).
    #[serde(default)]
    pub camera_signal_available: Option<bool>,

    /// Result of the primary's reachability probe on the camera host.
    /// `None` means unknown.
    #[serde(default)]
    pub camera_network_reachable: Option<bool>,

    /// Last error observed by the primary, if any.
    #[serde(default)]
    pub last_error: Option<String>,

    /// Peer address recorded by the ingress server. Not sent by the primary;
    /// filled in on arrival.
    #[serde(default)]
    pub source_address: String,

    /// Opaque configuration fingerprint or other extras the primary chooses
    /// to include.
    #[serde(default)]
    pub config: Option<Value>,

    /// Any other fields the primary sends that this server doesn't model
    /// explicitly.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl HeartbeatReport {
    /// Returns whether this report satisfies the healthy-report predicate
    /// defined in spec.md §4.4:
    ///
    /// `streamingActive == true` AND (camera signal is true or unknown) AND
    /// (camera network is true or unknown). A report that explicitly marks
    /// both camera indicators false is never healthy, even if streaming is
    /// reported active.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        if !self.streaming_active {
            return false;
        }
        let camera_signal_ok = self.camera_signal_available.unwrap_or(true);
        let camera_network_ok = self.camera_network_reachable.unwrap_or(true);
        camera_signal_ok && camera_network_ok
    }

    /// Returns whether this report is a "hard failure": both camera
    /// indicators are explicitly reported false. Used by the decision engine
    /// to fail over even while reports keep arriving (spec.md §4.4, §8
    /// scenario 5).
    #[must_use]
    pub fn is_hard_camera_failure(&self) -> bool {
        self.camera_signal_available == Some(false) && self.camera_network_reachable == Some(false)
    }
}

/// The decision engine's derived state (spec.md §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerState {
    /// Last observed state of the encoder unit.
    pub fallback_active: bool,
    /// Count of post-outage reports satisfying the recovery predicate.
    pub consecutive_healthy_reports: u32,
    /// Last time (monotonic ms since engine start) the engine issued a
    /// start or stop.
    pub last_transition_at: u64,
    /// Earliest time a new transition may be issued.
    pub cooldown_until: u64,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            fallback_active: false,
            consecutive_healthy_reports: 0,
            last_transition_at: 0,
            cooldown_until: 0,
        }
    }
}

/// A single scene in the slate encoder's rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    /// A local file path (streamed on loop) or a synthetic source
    /// specification consumed by the encoder's filter graph.
    pub source: String,
    /// How long to run this scene before rotating to the next one.
    pub duration_seconds: u32,
}

/// Configuration of the slate encoder (spec.md §3 `EncoderProfile`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderProfile {
    pub scenes: Vec<Scene>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub keyframe_interval_seconds: u32,
    pub preset: String,
    pub overlay_texts: Vec<String>,
    pub delay_seconds: u32,
    pub target_url: String,
    pub mode: SlateMode,
}

/// Synthetic source mode selector read from a small file at process start
/// (spec.md §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlateMode {
    /// Built-in "life-like" animated source.
    Life,
    /// Standard SMPTE color bars.
    Smpte,
}

impl SlateMode {
    /// Parses the single-line mode file contents, mapping `life` ->
    /// [`SlateMode::Life`], `smpte` -> [`SlateMode::Smpte`], and anything
    /// else to the supplied default (spec.md §4.6: "Unknown value defaults
    /// to the configured default").
    #[must_use]
    pub fn parse_or_default(raw: &str, default: SlateMode) -> SlateMode {
        match raw.trim() {
            "life" => SlateMode::Life,
            "smpte" => SlateMode::Smpte,
            _ => default,
        }
    }
}

/// Marker fragment that must appear in a valid backup ingest URL
/// (spec.md §3: "must include a 'backup' marker").
const BACKUP_MARKER: &str = "backup=1/";

/// Sanitizes a stream key: strips whitespace, strips query-string
/// characters, and collapses repeated `backup=1/` fragments that can
/// accumulate if a URL is normalized more than once.
///
/// Idempotent: `sanitize_stream_key(sanitize_stream_key(k)) ==
/// sanitize_stream_key(k)` for any `k` (spec.md §8).
#[must_use]
pub fn sanitize_stream_key(raw: &str) -> String {
    let mut key: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

    if let Some(idx) = key.find('?') {
        key.truncate(idx);
    }

    while key.contains(BACKUP_MARKER) {
        key = key.replace(BACKUP_MARKER, "");
    }

    key
}

/// Errors returned when building a normalized target URL.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UrlNormalizeError {
    /// The stream key was empty after sanitization.
    #[error("stream key is empty after sanitization")]
    EmptyKey,
    /// The base endpoint is not an RTMPS-class URL.
    #[error("base endpoint must be rtmps://")]
    NotRtmps,
    /// The base endpoint looks like the primary-ingest URL, not a backup
    /// endpoint (spec.md §4.6: "refuses to run against a primary-ingest
    /// URL").
    #[error("refusing to target a primary-ingest URL")]
    PrimaryIngestUrl,
}

/// Builds `{base}?backup=1/{key}` from a configured RTMPS backup endpoint
/// and a raw stream key, sanitizing the key first.
///
/// Idempotent: re-normalizing an already-normalized URL (by re-extracting
/// its key and re-running this function) yields the same URL (spec.md §8).
pub fn normalize_target_url(base: &str, raw_key: &str) -> Result<String, UrlNormalizeError> {
    if !base.starts_with("rtmps://") {
        return Err(UrlNormalizeError::NotRtmps);
    }
    if base.contains("/primary") || base.contains("primary=1") {
        return Err(UrlNormalizeError::PrimaryIngestUrl);
    }

    let key = sanitize_stream_key(raw_key);
    if key.is_empty() {
        return Err(UrlNormalizeError::EmptyKey);
    }

    let base = base.trim_end_matches('/');
    Ok(format!("{base}?{BACKUP_MARKER}{key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_report_requires_streaming_active() {
        let mut report = sample_report();
        report.streaming_active = false;
        assert!(!report.is_healthy());
    }

    #[test]
    fn unknown_camera_indicators_are_treated_as_healthy() {
        let mut report = sample_report();
        report.camera_signal_available = None;
        report.camera_network_reachable = None;
        assert!(report.is_healthy());
    }

    #[test]
    fn explicit_double_camera_failure_is_never_healthy() {
        let mut report = sample_report();
        report.camera_signal_available = Some(false);
        report.camera_network_reachable = Some(false);
        assert!(!report.is_healthy());
        assert!(report.is_hard_camera_failure());
    }

    #[test]
    fn one_camera_indicator_false_is_still_healthy() {
        let mut report = sample_report();
        report.camera_signal_available = Some(false);
        report.camera_network_reachable = Some(true);
        assert!(report.is_healthy());
        assert!(!report.is_hard_camera_failure());
    }

    fn sample_report() -> HeartbeatReport {
        HeartbeatReport {
            received_at: 0,
            reported_at: None,
            streaming_active: true,
            ffmpeg_running: true,
            day_window_active: true,
            camera_signal_available: Some(true),
            camera_network_reachable: Some(true),
            last_error: None,
            source_address: String::new(),
            config: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn sanitize_strips_whitespace() {
        assert_eq!(sanitize_stream_key("ab cd\tef"), "abcdef");
    }

    #[test]
    fn sanitize_strips_query_fragment() {
        assert_eq!(sanitize_stream_key("key123?foo=bar"), "key123");
    }

    #[test]
    fn sanitize_collapses_repeated_backup_marker() {
        assert_eq!(
            sanitize_stream_key("backup=1/backup=1/key123"),
            "key123"
        );
    }

    #[test]
    fn sanitize_is_idempotent() {
        for input in ["abc", "  a b ", "backup=1/backup=1/x?y=1", ""] {
            let once = sanitize_stream_key(input);
            let twice = sanitize_stream_key(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn normalize_rejects_non_rtmps_base() {
        let err = normalize_target_url("https://example.com/backup", "key").unwrap_err();
        assert_eq!(err, UrlNormalizeError::NotRtmps);
    }

    #[test]
    fn normalize_rejects_primary_ingest_base() {
        let err =
            normalize_target_url("rtmps://ingest.example.com/primary", "key").unwrap_err();
        assert_eq!(err, UrlNormalizeError::PrimaryIngestUrl);
    }

    #[test]
    fn normalize_rejects_empty_key() {
        let err = normalize_target_url("rtmps://ingest.example.com/backup", "   ").unwrap_err();
        assert_eq!(err, UrlNormalizeError::EmptyKey);
    }

    #[test]
    fn normalize_builds_expected_url() {
        let url = normalize_target_url("rtmps://ingest.example.com/backup", "abc123").unwrap();
        assert_eq!(url, "rtmps://ingest.example.com/backup?backup=1/abc123");
    }

    #[test]
    fn normalize_is_idempotent_via_key_reextraction() {
        let base = "rtmps://ingest.example.com/backup";
        let first = normalize_target_url(base, "abc 123?x=1").unwrap();
        let key = first.rsplit("backup=1/").next().unwrap();
        let second = normalize_target_url(base, key).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn slate_mode_parses_known_values() {
        assert_eq!(
            SlateMode::parse_or_default("life", SlateMode::Smpte),
            SlateMode::Life
        );
        assert_eq!(
            SlateMode::parse_or_default("smpte", SlateMode::Life),
            SlateMode::Smpte
        );
    }

    #[test]
    fn slate_mode_unknown_value_uses_default() {
        assert_eq!(
            SlateMode::parse_or_default("bogus", SlateMode::Life),
            SlateMode::Life
        );
    }
}
