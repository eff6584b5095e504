//! Slate encoder profile: the YAML scene/output configuration plus the
//! shell-style `KEY=VALUE` stream-key file (spec.md §6).
//!
//! The two are kept separate deliberately: the YAML file holds the
//! (non-secret) encoding parameters an operator edits by hand, while the
//! `KEY=VALUE` file is where `YT_KEY` (the secret stream key) is injected by
//! whatever provisioning mechanism manages credentials.

use std::collections::HashMap;
use std::path::Path;

use fallback_core::model::{normalize_target_url, EncoderProfile, Scene, SlateMode, UrlNormalizeError};
use serde::Deserialize;
use thiserror::Error;

/// Errors building a final, validated [`EncoderProfile`].
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read config file {0}: {1}")]
    ReadConfig(String, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    ParseConfig(String, serde_yaml::Error),
    #[error("failed to read stream key file {0}: {1}")]
    ReadKeyFile(String, std::io::Error),
    #[error("stream key file {0} has no YT_KEY entry")]
    MissingStreamKey(String),
    #[error("invalid target URL: {0}")]
    InvalidUrl(#[from] UrlNormalizeError),
    #[error("scene list must not be empty")]
    EmptyScenes,
}

/// YAML-sourced portion of the encoder profile (spec.md §3 `EncoderProfile`,
/// minus the derived `target_url`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFile {
    pub scenes: Vec<Scene>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_video_bitrate_kbps")]
    pub video_bitrate_kbps: u32,
    #[serde(default = "default_audio_bitrate_kbps")]
    pub audio_bitrate_kbps: u32,
    #[serde(default = "default_keyframe_interval_seconds")]
    pub keyframe_interval_seconds: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default)]
    pub overlay_texts: Vec<String>,
    #[serde(default)]
    pub delay_seconds: u32,
    /// RTMPS backup endpoint base, e.g. `rtmps://ingest.example.com/backup`.
    pub rtmps_base_url: String,
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_fps() -> u32 {
    30
}
fn default_video_bitrate_kbps() -> u32 {
    2500
}
fn default_audio_bitrate_kbps() -> u32 {
    128
}
fn default_keyframe_interval_seconds() -> u32 {
    2
}
fn default_preset() -> String {
    "veryfast".to_string()
}

impl ProfileFile {
    /// Loads and parses the YAML profile file.
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProfileError::ReadConfig(display.clone(), e))?;
        serde_yaml::from_str(&content).map_err(|e| ProfileError::ParseConfig(display, e))
    }
}

/// Parses a shell-style `KEY=VALUE` file (one assignment per line, `#`
/// comments and blank lines ignored) and returns the map of keys to values.
pub fn parse_key_value_file(path: &Path) -> Result<HashMap<String, String>, ProfileError> {
    let display = path.display().to_string();
    let content =
        std::fs::read_to_string(path).map_err(|e| ProfileError::ReadKeyFile(display, e))?;

    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    Ok(map)
}

/// Builds the final, validated [`EncoderProfile`] from a YAML profile file
/// and a `KEY=VALUE` stream-key file.
///
/// Mirrors spec.md §4.6 steps 1-2: sanitize the stream key, then normalize
/// the target URL, refusing primary-ingest or non-RTMPS endpoints.
pub fn build_profile(
    config_path: &Path,
    key_file_path: &Path,
    mode_file_path: &Path,
    default_mode: SlateMode,
) -> Result<EncoderProfile, ProfileError> {
    let file = ProfileFile::load(config_path)?;
    if file.scenes.is_empty() {
        return Err(ProfileError::EmptyScenes);
    }

    let key_values = parse_key_value_file(key_file_path)?;
    let raw_key = key_values
        .get("YT_KEY")
        .cloned()
        .ok_or_else(|| ProfileError::MissingStreamKey(key_file_path.display().to_string()))?;

    let target_url = normalize_target_url(&file.rtmps_base_url, &raw_key)?;

    let mode = std::fs::read_to_string(mode_file_path)
        .map(|raw| SlateMode::parse_or_default(&raw, default_mode))
        .unwrap_or(default_mode);

    Ok(EncoderProfile {
        scenes: file.scenes,
        width: file.width,
        height: file.height,
        fps: file.fps,
        video_bitrate_kbps: file.video_bitrate_kbps,
        audio_bitrate_kbps: file.audio_bitrate_kbps,
        keyframe_interval_seconds: file.keyframe_interval_seconds,
        preset: file.preset,
        overlay_texts: file.overlay_texts,
        delay_seconds: file.delay_seconds,
        target_url,
        mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(path: &Path, contents: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn parses_key_value_file_ignoring_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.env");
        write(&path, "# comment\n\nYT_KEY = abc123 \nOTHER=value\n");
        let map = parse_key_value_file(&path).unwrap();
        assert_eq!(map.get("YT_KEY").unwrap(), "abc123");
        assert_eq!(map.get("OTHER").unwrap(), "value");
    }

    #[test]
    fn missing_yt_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.env");
        write(&path, "OTHER=value\n");
        let err = parse_key_value_file(&path).unwrap();
        assert!(!err.contains_key("YT_KEY"));
    }

    #[test]
    fn build_profile_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("profile.yaml");
        let key_path = dir.path().join("keys.env");
        let mode_path = dir.path().join("mode.txt");

        write(
            &config_path,
            "scenes:\n  - source: \"/media/slate.mp4\"\n    durationSeconds: 60\nrtmpsBaseUrl: \"rtmps://ingest.example.com/backup\"\n",
        );
        write(&key_path, "YT_KEY=abc 123?x=1\n");
        write(&mode_path, "smpte\n");

        let profile =
            build_profile(&config_path, &key_path, &mode_path, SlateMode::Life).unwrap();
        assert_eq!(profile.mode, SlateMode::Smpte);
        assert_eq!(
            profile.target_url,
            "rtmps://ingest.example.com/backup?backup=1/abc123"
        );
    }

    #[test]
    fn build_profile_rejects_empty_scene_list() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("profile.yaml");
        let key_path = dir.path().join("keys.env");
        let mode_path = dir.path().join("mode.txt");

        write(
            &config_path,
            "scenes: []\nrtmpsBaseUrl: \"rtmps://ingest.example.com/backup\"\n",
        );
        write(&key_path, "YT_KEY=abc123\n");

        let err = build_profile(&config_path, &key_path, &mode_path, SlateMode::Life).unwrap_err();
        assert!(matches!(err, ProfileError::EmptyScenes));
    }

    #[test]
    fn build_profile_rejects_missing_mode_file_by_defaulting() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("profile.yaml");
        let key_path = dir.path().join("keys.env");
        let mode_path = dir.path().join("does_not_exist.txt");

        write(
            &config_path,
            "scenes:\n  - source: \"/media/slate.mp4\"\n    durationSeconds: 60\nrtmpsBaseUrl: \"rtmps://ingest.example.com/backup\"\n",
        );
        write(&key_path, "YT_KEY=abc123\n");

        let profile =
            build_profile(&config_path, &key_path, &mode_path, SlateMode::Life).unwrap();
        assert_eq!(profile.mode, SlateMode::Life);
    }
}
