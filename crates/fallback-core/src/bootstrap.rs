//! Application bootstrap and dependency wiring.
//!
//! The composition root: the single place where the record store, the
//! service supervisor, the decision engine, and the HTTP state are
//! instantiated and wired together. Grounded on the teacher's
//! `packages/thaumic-core/src/bootstrap.rs` (`bootstrap_services`,
//! `BootstrappedServices`, shutdown sequencing).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{AppState, AuthConfig};
use crate::decision::{DecisionConfig, DecisionEngine, RecoveryHintScheduler};
use crate::recovery_probe::PlatformClient;
use crate::runtime::TokioSpawner;
use crate::store::HeartbeatStore;
use crate::supervisor::{ServiceController, SystemctlController};

/// Inputs the monitor binary's config loader supplies to the composition
/// root. Produced by `apps/monitor`'s config layer (CLI + YAML + env
/// overrides), analogous to the teacher's `ServerConfig::to_core_config`.
pub struct BootstrapConfig {
    pub state_file_path: std::path::PathBuf,
    pub history_window_seconds: u64,
    pub max_records: usize,
    pub encoder_unit_name: String,
    pub elevation_wrapper: Option<String>,
    pub decision: DecisionConfig,
    pub auth_token: Option<String>,
    pub recovery_probe: Option<RecoveryProbeConfig>,
}

/// Recovery-probe wiring; absent when the platform integration (C5) is
/// disabled, e.g. in an offline deployment (spec.md §4.5: optional).
pub struct RecoveryProbeConfig {
    pub platform_base_url: String,
    pub token_file: std::path::PathBuf,
    pub stream_id: String,
    pub cooldown_seconds: u64,
}

/// All services wired during bootstrap, ready to drive an HTTP server and a
/// background decision-engine tick loop.
pub struct BootstrappedServices {
    pub store: Arc<HeartbeatStore>,
    pub engine: Arc<DecisionEngine>,
    pub app_state: AppState,
    pub spawner: Arc<TokioSpawner>,
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown: cancels the decision engine's tick loop.
    /// The store's JSON mirror is already durable after every write, so
    /// there is nothing further to flush.
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] beginning graceful shutdown");
        self.cancel_token.cancel();
    }
}

/// Wires the heartbeat store, encoder supervisor, optional recovery-probe
/// scheduler, and decision engine into a ready-to-run
/// [`BootstrappedServices`].
///
/// Wiring order mirrors the teacher's dependency-order comment: shared
/// infrastructure first (store, spawner), then the supervisor, then
/// anything the decision engine depends on, then the engine itself, then
/// the HTTP-facing `AppState`.
#[must_use]
pub fn bootstrap_services(config: BootstrapConfig) -> BootstrappedServices {
    let store = Arc::new(HeartbeatStore::new(
        config.state_file_path,
        config.history_window_seconds,
        config.max_records,
    ));
    store.load();

    let spawner = Arc::new(TokioSpawner::current());
    let cancel_token = CancellationToken::new();

    let controller: Arc<dyn ServiceController> = Arc::new(SystemctlController::new(
        config.encoder_unit_name,
        config.elevation_wrapper,
    ));

    let recovery_hint = config.recovery_probe.map(|probe| {
        let client = Arc::new(PlatformClient::new(probe.platform_base_url, probe.token_file));
        Arc::new(RecoveryHintScheduler::new(
            client,
            probe.stream_id,
            probe.cooldown_seconds,
        ))
    });

    let engine = Arc::new(DecisionEngine::new(
        Arc::clone(&store),
        controller,
        config.decision,
        recovery_hint,
    ));
    // The engine's own cancellation token drives its tick loop; the
    // bootstrap-level token below is what `shutdown()` actually cancels. Tie
    // them so a single shutdown call reaches the engine too.
    let engine_cancel = engine.cancel_token();
    let bootstrap_cancel = cancel_token.clone();
    spawner.spawn(async move {
        bootstrap_cancel.cancelled().await;
        engine_cancel.cancel();
    });

    let app_state = AppState {
        store: Arc::clone(&store),
        engine: Arc::clone(&engine),
        auth: Arc::new(AuthConfig {
            token: config.auth_token,
        }),
    };

    BootstrappedServices {
        store,
        engine,
        app_state,
        spawner,
        cancel_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_wires_empty_store_and_default_decision_config() {
        let dir = tempfile::tempdir().unwrap();
        let services = bootstrap_services(BootstrapConfig {
            state_file_path: dir.path().join("state.json"),
            history_window_seconds: 300,
            max_records: 100,
            encoder_unit_name: "fallback-encoder.service".to_string(),
            elevation_wrapper: None,
            decision: DecisionConfig::default(),
            auth_token: None,
            recovery_probe: None,
        });

        assert!(services.store.is_empty());
        assert!(!services.engine.controller_state().fallback_active);
        assert!(services.app_state.auth.token.is_none());
    }

    #[tokio::test]
    async fn shutdown_cancels_the_engines_tick_loop() {
        let dir = tempfile::tempdir().unwrap();
        let services = bootstrap_services(BootstrapConfig {
            state_file_path: dir.path().join("state.json"),
            history_window_seconds: 300,
            max_records: 100,
            encoder_unit_name: "fallback-encoder.service".to_string(),
            elevation_wrapper: None,
            decision: DecisionConfig::default(),
            auth_token: None,
            recovery_probe: None,
        });

        let engine_cancel = services.engine.cancel_token();
        services.shutdown();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(engine_cancel.is_cancelled());
    }
}
