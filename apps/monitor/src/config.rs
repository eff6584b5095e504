//! Monitor configuration.
//!
//! Supports loading from YAML files with environment variable overrides,
//! following the `apps/server` config pattern (spec.md §6's fully-enumerated
//! key table).

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Monitor configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Listen address for the ingress HTTP server.
    pub bind: IpAddr,
    /// Listen port for the ingress HTTP server.
    /// Override: `FALLBACK_PORT`
    pub port: u16,

    /// Retention for the heartbeat record store.
    pub history_window_seconds: u64,
    /// Maximum number of retained records.
    pub max_records: usize,
    /// On-disk mirror of the heartbeat record store.
    /// Override: `FALLBACK_STATE_FILE_PATH`
    pub state_file_path: PathBuf,

    /// Engine: outage threshold.
    pub missed_threshold_seconds: u64,
    /// Engine: consecutive healthy reports to clear the fallback.
    pub recovery_reports: u32,
    /// Engine tick period.
    pub check_interval_seconds: u64,
    /// Engine: minimum time between transitions.
    pub cooldown_seconds: u64,

    /// Service-manager unit name controlled by the encoder supervisor.
    /// Override: `FALLBACK_SECONDARY_UNIT`
    pub secondary_unit: String,
    /// Wrapper command (e.g. `sudo`) used when the direct service-manager
    /// invocation is denied for lack of privilege.
    pub elevation_wrapper: Option<String>,

    /// Bearer token required of inbound requests. `None` disables auth
    /// entirely unless `require_token` is set.
    /// Override: `FALLBACK_TOKEN`
    pub token: Option<String>,
    /// If true, refuse to start without a configured `token` rather than
    /// silently running unauthenticated.
    pub require_token: bool,

    /// Enables the broadcast recovery probe (C5). When false, recovery
    /// transitions skip the platform API call entirely.
    pub recovery_probe_enabled: bool,
    /// Base URL of the video platform's REST API.
    pub platform_base_url: String,
    /// Path to the cached OAuth refresh token.
    pub platform_token_file: PathBuf,
    /// Stream identifier the recovery probe checks bindings against.
    pub stream_id: String,
    /// Minimum interval between C5 invocations.
    pub recovery_hint_cooldown_seconds: u64,

    /// Dedicated log file path for the monitor. When unset, logs go to
    /// stderr only (via `env_logger`'s default target).
    pub log_file_path: Option<PathBuf>,

    /// Whether the secondary also actively probes the camera host.
    /// Parsed for completeness with spec.md §6's key table; no component in
    /// this implementation currently acts on it (no spec component
    /// describes a secondary-initiated camera probe; `cameraSignalAvailable`
    /// /`cameraNetworkReachable` are reported by the primary in C7).
    pub camera_ping_enabled: bool,
    /// Host to probe when `camera_ping_enabled` is set.
    pub camera_ping_host: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: 8099,
            history_window_seconds: 300,
            max_records: 500,
            state_file_path: PathBuf::from("fallback-state.json"),
            missed_threshold_seconds: 40,
            recovery_reports: 2,
            check_interval_seconds: 5,
            cooldown_seconds: 30,
            secondary_unit: "fallback-encoder.service".to_string(),
            elevation_wrapper: None,
            token: None,
            require_token: false,
            recovery_probe_enabled: false,
            platform_base_url: String::new(),
            platform_token_file: PathBuf::from("platform-token"),
            stream_id: String::new(),
            recovery_hint_cooldown_seconds: 300,
            log_file_path: None,
            camera_ping_enabled: false,
            camera_ping_host: None,
        }
    }
}

impl MonitorConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("FALLBACK_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = std::env::var("FALLBACK_STATE_FILE_PATH") {
            self.state_file_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FALLBACK_SECONDARY_UNIT") {
            self.secondary_unit = val;
        }
        if let Ok(val) = std::env::var("FALLBACK_TOKEN") {
            self.token = Some(val);
        }
    }

    /// Rejects configurations that claim to require a token but don't have
    /// one (spec.md §6: `token`/`requireToken`).
    fn validate(&self) -> Result<()> {
        if self.require_token && self.token.is_none() {
            bail!("requireToken is set but no token is configured");
        }
        if self.recovery_probe_enabled {
            if self.platform_base_url.is_empty() {
                bail!("recoveryProbeEnabled is set but platformBaseUrl is empty");
            }
            if self.stream_id.is_empty() {
                bail!("recoveryProbeEnabled is set but streamId is empty");
            }
        }
        Ok(())
    }

    /// Converts to `fallback-core`'s bootstrap configuration.
    pub fn to_bootstrap_config(&self) -> fallback_core::BootstrapConfig {
        fallback_core::BootstrapConfig {
            state_file_path: self.state_file_path.clone(),
            history_window_seconds: self.history_window_seconds,
            max_records: self.max_records,
            encoder_unit_name: self.secondary_unit.clone(),
            elevation_wrapper: self.elevation_wrapper.clone(),
            decision: fallback_core::DecisionConfig {
                check_interval_seconds: self.check_interval_seconds,
                missed_threshold_seconds: self.missed_threshold_seconds,
                recovery_reports: self.recovery_reports,
                cooldown_seconds: self.cooldown_seconds,
            },
            auth_token: self.token.clone(),
            recovery_probe: self.recovery_probe_enabled.then(|| fallback_core::RecoveryProbeConfig {
                platform_base_url: self.platform_base_url.clone(),
                token_file: self.platform_token_file.clone(),
                stream_id: self.stream_id.clone(),
                cooldown_seconds: self.recovery_hint_cooldown_seconds,
            }),
        }
    }
}
