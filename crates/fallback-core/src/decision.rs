//! Decision Engine (spec.md §4.4, component C4).
//!
//! The heart of the system: a periodic evaluator that applies hysteresis
//! over the record store and drives the encoder supervisor. Tick loop shape
//! (interval + cancellation + notify) is grounded on the teacher's
//! `TopologyMonitor::start_monitoring`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::model::{ControllerState, HeartbeatReport};
use crate::recovery_probe::{run_recovery_hint, PlatformClient};
use crate::runtime::TaskSpawner;
use crate::store::{self, HeartbeatStore};
use crate::supervisor::{ControlOutcome, ServiceController};

/// Decision engine tuning knobs (spec.md §4.4 table).
#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub check_interval_seconds: u64,
    pub missed_threshold_seconds: u64,
    pub recovery_reports: u32,
    pub cooldown_seconds: u64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 5,
            missed_threshold_seconds: 40,
            recovery_reports: 2,
            cooldown_seconds: 30,
        }
    }
}

/// Schedules the Broadcast Recovery Probe (C5) on recovery transitions, with
/// its own cooldown independent of the decision engine's (spec.md §4.4: "the
/// engine schedules C5 exactly once, in a separate worker, with its own
/// independent cooldown").
pub struct RecoveryHintScheduler {
    client: Arc<PlatformClient>,
    stream_id: String,
    cooldown: Duration,
    last_run_at: Mutex<Option<Instant>>,
}

impl RecoveryHintScheduler {
    #[must_use]
    pub fn new(client: Arc<PlatformClient>, stream_id: impl Into<String>, cooldown_seconds: u64) -> Self {
        Self {
            client,
            stream_id: stream_id.into(),
            cooldown: Duration::from_secs(cooldown_seconds),
            last_run_at: Mutex::new(None),
        }
    }

    /// Fires the recovery hint in a background task unless its own cooldown
    /// has not yet elapsed.
    fn trigger(self: &Arc<Self>, spawner: &dyn TaskSpawner) {
        let now = Instant::now();
        {
            let mut last = self.last_run_at.lock();
            if let Some(prev) = *last {
                if now.duration_since(prev) < self.cooldown {
                    log::debug!("[DecisionEngine] recovery hint suppressed by its own cooldown");
                    return;
                }
            }
            *last = Some(now);
        }

        let this = Arc::clone(self);
        spawner.spawn(async move {
            run_recovery_hint(&this.client, &this.stream_id).await;
        });
    }
}

/// Returns the number of trailing reports (most recent first) that satisfy
/// the healthy-report predicate, stopping at the first one that doesn't, and
/// never counting reports received before `since_wall_ms` (the wall-clock
/// time of the last down-transition). Without this cutoff, reports left over
/// from before the outage would count toward recovery alongside reports that
/// arrive after it (spec.md §8 scenario 3->4).
fn trailing_healthy_count(snapshot: &[HeartbeatReport], since_wall_ms: u64) -> u32 {
    snapshot
        .iter()
        .rev()
        .take_while(|r| r.received_at > since_wall_ms && r.is_healthy())
        .count() as u32
}

/// Periodic evaluator applying hysteresis over the heartbeat record store
/// (spec.md §4.4).
pub struct DecisionEngine {
    store: Arc<HeartbeatStore>,
    controller: Arc<dyn ServiceController>,
    config: DecisionConfig,
    state: RwLock<ControllerState>,
    last_decision: RwLock<(String, String)>,
    recovery_hint: Option<Arc<RecoveryHintScheduler>>,
    cancel_token: CancellationToken,
    start_instant: Instant,
    /// Wall-clock time of the last down-transition; reports received before
    /// this never count toward the trailing healthy-report total.
    last_transition_wall_ms: RwLock<u64>,
}

impl DecisionEngine {
    #[must_use]
    pub fn new(
        store: Arc<HeartbeatStore>,
        controller: Arc<dyn ServiceController>,
        config: DecisionConfig,
        recovery_hint: Option<Arc<RecoveryHintScheduler>>,
    ) -> Self {
        Self {
            store,
            controller,
            config,
            state: RwLock::new(ControllerState::default()),
            last_decision: RwLock::new(("startup".to_string(), chrono::Utc::now().to_rfc3339())),
            recovery_hint,
            cancel_token: CancellationToken::new(),
            start_instant: Instant::now(),
            last_transition_wall_ms: RwLock::new(0),
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Returns the current `ControllerState` snapshot.
    #[must_use]
    pub fn controller_state(&self) -> ControllerState {
        *self.state.read()
    }

    /// Returns `(lastDecision, decidedAt)` for the `GET /status` response.
    #[must_use]
    pub fn last_decision(&self) -> (String, String) {
        self.last_decision.read().clone()
    }

    fn now_mono_ms(&self) -> u64 {
        self.start_instant.elapsed().as_millis() as u64
    }

    fn set_last_decision(&self, text: impl Into<String>) {
        *self.last_decision.write() = (text.into(), chrono::Utc::now().to_rfc3339());
    }

    /// Runs the tick loop until cancelled. Grounded on the teacher's
    /// `TopologyMonitor::start_monitoring` `tokio::select!` shape.
    pub async fn run(self: Arc<Self>, spawner: Arc<dyn TaskSpawner>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.check_interval_seconds));
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    log::info!("[DecisionEngine] shutting down after current tick");
                    break;
                }
                _ = interval.tick() => {
                    self.tick(spawner.as_ref()).await;
                }
            }
        }
    }

    /// Evaluates one decision tick: re-derives the hysteresis state from the
    /// current store snapshot and, outside of cooldown, issues a start/stop
    /// through the supervisor.
    pub async fn tick(&self, spawner: &dyn TaskSpawner) {
        let now_wall_ms = store::now_millis();
        self.store.evict(now_wall_ms);
        let snapshot = self.store.snapshot();

        let latest = snapshot.last();
        let age_ms = latest.map(|r| now_wall_ms.saturating_sub(r.received_at));
        let missed_threshold_ms = self.config.missed_threshold_seconds.saturating_mul(1000);

        // Inclusive boundary: age == threshold is still fresh (spec.md §8).
        let primary_missing = age_ms.map(|a| a > missed_threshold_ms).unwrap_or(true);
        let within_threshold = age_ms.map(|a| a <= missed_threshold_ms).unwrap_or(false);
        let hard_failure = latest.map(HeartbeatReport::is_hard_camera_failure).unwrap_or(false);
        let since_wall_ms = *self.last_transition_wall_ms.read();
        let trailing_healthy = trailing_healthy_count(&snapshot, since_wall_ms);

        let now_mono_ms = self.now_mono_ms();
        let cooldown_ms = self.config.cooldown_seconds.saturating_mul(1000);

        let fallback_active = self.state.read().fallback_active;
        let in_cooldown = now_mono_ms < self.state.read().cooldown_until;

        {
            let mut state = self.state.write();
            state.consecutive_healthy_reports = trailing_healthy;
        }

        if !fallback_active {
            if primary_missing || hard_failure {
                let reason = if hard_failure {
                    "hard camera failure reported"
                } else {
                    "primary report missing or stale"
                };
                if in_cooldown {
                    self.set_last_decision(format!(
                        "would start fallback ({reason}) but still in cooldown"
                    ));
                    return;
                }
                match self.controller.start().await {
                    Ok(ControlOutcome::Ok) | Ok(ControlOutcome::AlreadyInDesiredState) => {
                        let mut state = self.state.write();
                        state.fallback_active = true;
                        state.consecutive_healthy_reports = 0;
                        state.last_transition_at = now_mono_ms;
                        state.cooldown_until = now_mono_ms + cooldown_ms;
                        drop(state);
                        *self.last_transition_wall_ms.write() = now_wall_ms;
                        log::warn!("[DecisionEngine] starting fallback: {reason}");
                        self.set_last_decision(format!("started fallback: {reason}"));
                    }
                    Err(e) => {
                        log::error!("[DecisionEngine] failed to start fallback encoder: {e}");
                        self.set_last_decision(format!("start failed, retrying next tick: {e}"));
                    }
                }
            } else {
                self.set_last_decision("primary healthy");
            }
        } else {
            let recovered = within_threshold && trailing_healthy >= self.config.recovery_reports;
            if recovered {
                if in_cooldown {
                    self.set_last_decision("recovery criteria met but still in cooldown");
                    return;
                }
                match self.controller.stop().await {
                    Ok(ControlOutcome::Ok) | Ok(ControlOutcome::AlreadyInDesiredState) => {
                        let mut state = self.state.write();
                        state.fallback_active = false;
                        state.consecutive_healthy_reports = 0;
                        state.last_transition_at = now_mono_ms;
                        state.cooldown_until = now_mono_ms + cooldown_ms;
                        log::info!("[DecisionEngine] primary recovered, stopping fallback");
                        self.set_last_decision("stopped fallback: primary recovered");
                        if let Some(hint) = &self.recovery_hint {
                            hint.trigger(spawner);
                        }
                    }
                    Err(e) => {
                        log::error!("[DecisionEngine] failed to stop fallback encoder: {e}");
                        self.set_last_decision(format!("stop failed, retrying next tick: {e}"));
                    }
                }
            } else {
                self.set_last_decision("fallback active, awaiting recovery");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TokioSpawner;
    use crate::supervisor::FakeController;
    use std::collections::HashMap;

    fn report(streaming_active: bool, received_at: u64) -> HeartbeatReport {
        HeartbeatReport {
            received_at,
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

    fn engine(store: Arc<HeartbeatStore>, config: DecisionConfig) -> (Arc<DecisionEngine>, Arc<FakeController>) {
        let controller = Arc::new(FakeController::new());
        let engine = Arc::new(DecisionEngine::new(store, controller.clone(), config, None));
        (engine, controller)
    }

    #[tokio::test]
    async fn empty_store_starts_fallback_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(HeartbeatStore::new(dir.path().join("state.json"), 300, 100));
        let (engine, controller) = engine(store, DecisionConfig::default());

        let spawner = TokioSpawner::current();
        engine.tick(&spawner).await;

        assert!(controller.is_active().await.unwrap());
        assert!(engine.controller_state().fallback_active);
    }

    #[tokio::test]
    async fn fresh_healthy_report_keeps_primary_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(HeartbeatStore::new(dir.path().join("state.json"), 300, 100));
        store.insert_for_test(report(true, store::now_millis()));
        let (engine, controller) = engine(store, DecisionConfig::default());

        let spawner = TokioSpawner::current();
        engine.tick(&spawner).await;

        assert!(!controller.is_active().await.unwrap());
        assert!(!engine.controller_state().fallback_active);
    }

    #[tokio::test]
    async fn stale_report_triggers_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(HeartbeatStore::new(dir.path().join("state.json"), 300, 100));
        let now = store::now_millis();
        store.insert_for_test(report(true, now.saturating_sub(41_000)));
        let (engine, controller) = engine(store, DecisionConfig::default());

        let spawner = TokioSpawner::current();
        engine.tick(&spawner).await;

        assert!(controller.is_active().await.unwrap());
    }

    #[tokio::test]
    async fn report_exactly_at_threshold_is_still_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(HeartbeatStore::new(dir.path().join("state.json"), 300, 100));
        let now = store::now_millis();
        store.insert_for_test(report(true, now.saturating_sub(40_000)));
        let (engine, controller) = engine(store, DecisionConfig::default());

        let spawner = TokioSpawner::current();
        engine.tick(&spawner).await;

        assert!(!controller.is_active().await.unwrap());
    }

    #[tokio::test]
    async fn hard_camera_failure_triggers_fallback_despite_fresh_reports() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(HeartbeatStore::new(dir.path().join("state.json"), 300, 100));
        let now = store::now_millis();
        let mut bad = report(true, now);
        bad.camera_signal_available = Some(false);
        bad.camera_network_reachable = Some(false);
        store.insert_for_test(bad);
        let (engine, controller) = engine(store, DecisionConfig::default());

        let spawner = TokioSpawner::current();
        engine.tick(&spawner).await;

        assert!(controller.is_active().await.unwrap());
    }

    #[tokio::test]
    async fn recovery_requires_consecutive_healthy_reports_within_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(HeartbeatStore::new(dir.path().join("state.json"), 300, 100));
        let config = DecisionConfig {
            cooldown_seconds: 0,
            ..DecisionConfig::default()
        };
        let (engine, controller) = engine(store.clone(), config);

        // First tick: empty store, enters fallback.
        let spawner = TokioSpawner::current();
        engine.tick(&spawner).await;
        assert!(controller.is_active().await.unwrap());

        // One healthy report isn't enough (default recoveryReports = 2).
        let now = store::now_millis();
        store.insert_for_test(report(true, now));
        engine.tick(&spawner).await;
        assert!(controller.is_active().await.unwrap());

        // Two consecutive healthy reports clears it.
        store.insert_for_test(report(true, store::now_millis()));
        engine.tick(&spawner).await;
        assert!(!controller.is_active().await.unwrap());
    }

    #[tokio::test]
    async fn healthy_reports_left_over_from_before_the_outage_do_not_count_toward_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(HeartbeatStore::new(dir.path().join("state.json"), 300, 100));
        let config = DecisionConfig {
            cooldown_seconds: 0,
            ..DecisionConfig::default()
        };

        // A healthy report sitting in the window well before the primary goes
        // stale (still within the retention window, so eviction won't drop it).
        let now = store::now_millis();
        store.insert_for_test(report(true, now.saturating_sub(35_000)));
        // Then the primary goes stale: triggers fallback.
        store.insert_for_test(report(true, now.saturating_sub(41_000)));

        let (engine, controller) = engine(store.clone(), config);
        let spawner = TokioSpawner::current();
        engine.tick(&spawner).await;
        assert!(controller.is_active().await.unwrap());

        // Exactly one healthy report arrives after the transition. If the
        // leftover pre-outage report above were still counted, this would
        // already reach recoveryReports = 2 and recover prematurely.
        store.insert_for_test(report(true, store::now_millis()));
        engine.tick(&spawner).await;
        assert!(
            controller.is_active().await.unwrap(),
            "recovery must not fire on a single post-transition healthy report"
        );

        // A second post-transition healthy report completes the threshold.
        store.insert_for_test(report(true, store::now_millis()));
        engine.tick(&spawner).await;
        assert!(!controller.is_active().await.unwrap());
    }

    #[tokio::test]
    async fn cooldown_suppresses_a_second_transition() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(HeartbeatStore::new(dir.path().join("state.json"), 300, 100));
        let config = DecisionConfig {
            cooldown_seconds: 3600,
            ..DecisionConfig::default()
        };
        let (engine, controller) = engine(store.clone(), config);

        let spawner = TokioSpawner::current();
        engine.tick(&spawner).await;
        assert!(controller.is_active().await.unwrap());

        // Even though recovery reports arrive, the cooldown blocks the stop.
        let now = store::now_millis();
        store.insert_for_test(report(true, now));
        store.insert_for_test(report(true, now));
        engine.tick(&spawner).await;
        assert!(controller.is_active().await.unwrap());
    }

    #[tokio::test]
    async fn supervisor_failure_does_not_flip_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(HeartbeatStore::new(dir.path().join("state.json"), 300, 100));
        let (engine, controller) = engine(store, DecisionConfig::default());
        *controller.fail_next.lock() = Some(crate::supervisor::SupervisorError::Timeout);

        let spawner = TokioSpawner::current();
        engine.tick(&spawner).await;

        assert!(!engine.controller_state().fallback_active);
    }
}
