//! Fallback Core - shared library for the heartbeat-driven fallback
//! controller.
//!
//! Provides the record store (C1), the ingress HTTP server (C2), the
//! encoder supervisor (C3), the decision engine (C4), the broadcast
//! recovery probe (C5/C8), and the composition root wiring them together.
//! Consumed by `apps/monitor` (the long-running server) and
//! `apps/ensure-broadcast` (the one-shot probe binary).
//!
//! # Architecture
//!
//! - [`model`]: wire and persisted data types
//! - [`store`]: the heartbeat record store
//! - [`supervisor`]: the `ServiceController` abstraction over the OS service
//!   manager
//! - [`decision`]: the hysteresis decision engine
//! - [`recovery_probe`]: the shared video-platform REST client
//! - [`runtime`]: task-spawning abstraction for runtime independence
//! - [`api`]: the ingress HTTP server
//! - [`bootstrap`]: the composition root
//! - [`error`]: centralized error types

pub mod api;
pub mod bootstrap;
pub mod decision;
pub mod error;
pub mod model;
pub mod recovery_probe;
pub mod runtime;
pub mod store;
pub mod supervisor;

pub use bootstrap::{bootstrap_services, BootstrapConfig, BootstrappedServices, RecoveryProbeConfig};
pub use decision::{DecisionConfig, DecisionEngine, RecoveryHintScheduler};
pub use error::{ErrorCode, FallbackError, FallbackResult};
pub use model::{
    normalize_target_url, sanitize_stream_key, ControllerState, EncoderProfile, HeartbeatReport,
    Scene, SlateMode, UrlNormalizeError,
};
pub use recovery_probe::{
    ensure_broadcast, run_recovery_hint, BindingOutcome, EnsureBroadcastExit, PlatformClient,
    PlatformError,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use store::HeartbeatStore;
pub use supervisor::{ControlOutcome, ControlResult, ServiceController, SupervisorError, SystemctlController};
