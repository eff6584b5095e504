//! Encoder Supervisor (spec.md §4.3, component C3).
//!
//! A thin adapter over the OS service manager, modeled per spec.md §9's
//! design note as a `ServiceController` capability that returns a result
//! instead of throwing. The decision engine (`decision.rs`) branches on the
//! result and never panics on a failed control operation.

use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Overall timeout for a single service-manager invocation (spec.md §4.3).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors a [`ServiceController`] implementation can report. These never
/// propagate as panics; the decision engine treats every variant as "no
/// state change, retry next tick" (spec.md §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// The service manager refused the operation due to insufficient
    /// privilege, and the elevation wrapper also failed or is unavailable.
    #[error("permission denied controlling the service")]
    PermissionDenied,
    /// The invocation did not complete within the control timeout.
    #[error("service control operation timed out")]
    Timeout,
    /// Any other failure, with the service manager's own message attached.
    #[error("service control failed: {0}")]
    Other(String),
}

/// Outcome of a single `start`/`stop` control operation, per spec.md §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The operation changed the unit's state as requested.
    Ok,
    /// The unit was already in the desired state; no-op (spec.md §4.3:
    /// "idempotent").
    AlreadyInDesiredState,
}

pub type ControlResult = Result<ControlOutcome, SupervisorError>;

/// Abstraction over the OS service manager, so the decision engine doesn't
/// depend on `systemctl` directly and tests can substitute a fake.
#[async_trait::async_trait]
pub trait ServiceController: Send + Sync {
    /// Starts the unit. Idempotent: a no-op if already active.
    async fn start(&self) -> ControlResult;
    /// Stops the unit. Idempotent: a no-op if already inactive.
    async fn stop(&self) -> ControlResult;
    /// Returns whether the unit is currently active.
    async fn is_active(&self) -> Result<bool, SupervisorError>;
}

/// Production [`ServiceController`] backed by `systemctl`.
///
/// Attempts the privileged command directly first; if blocked because
/// process elevation is disabled, falls back to an elevation wrapper
/// (e.g. `sudo`), per spec.md §4.3. Persistent permission failures are
/// logged once per occurrence with remediation guidance.
pub struct SystemctlController {
    unit_name: String,
    elevation_wrapper: Option<String>,
}

impl SystemctlController {
    /// Creates a controller for the named unit. `elevation_wrapper`, if
    /// set, is prepended (e.g. `"sudo"`) when the direct invocation is
    /// rejected for lack of privilege.
    #[must_use]
    pub fn new(unit_name: impl Into<String>, elevation_wrapper: Option<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
            elevation_wrapper,
        }
    }

    async fn run_systemctl(&self, action: &str) -> Result<(bool, String), SupervisorError> {
        let direct = self.invoke(None, action).await;
        match direct {
            Ok(result) => Ok(result),
            Err(SupervisorError::PermissionDenied) if self.elevation_wrapper.is_some() => {
                log::warn!(
                    "[Supervisor] direct systemctl {} denied for {}, falling back to elevation wrapper",
                    action,
                    self.unit_name
                );
                self.invoke(self.elevation_wrapper.as_deref(), action).await
            }
            Err(e) => Err(e),
        }
    }

    async fn invoke(
        &self,
        wrapper: Option<&str>,
        action: &str,
    ) -> Result<(bool, String), SupervisorError> {
        let mut command = if let Some(wrapper) = wrapper {
            let mut c = Command::new(wrapper);
            c.arg("systemctl");
            c
        } else {
            Command::new("systemctl")
        };
        command.arg(action).arg(&self.unit_name);

        let output = timeout(CONTROL_TIMEOUT, command.output())
            .await
            .map_err(|_| SupervisorError::Timeout)?
            .map_err(|e| SupervisorError::Other(e.to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            if stderr.to_lowercase().contains("permission denied")
                || stderr.to_lowercase().contains("access denied")
                || stderr.to_lowercase().contains("interactive authentication required")
            {
                log::error!(
                    "[Supervisor] permission denied running systemctl {} {}: {}. \
                     Grant the secondary host's service account control over this unit \
                     (e.g. via a polkit rule or passwordless sudo entry) to clear this.",
                    action,
                    self.unit_name,
                    stderr.trim()
                );
                return Err(SupervisorError::PermissionDenied);
            }
            return Err(SupervisorError::Other(stderr));
        }

        Ok((output.status.success(), stderr))
    }
}

#[async_trait::async_trait]
impl ServiceController for SystemctlController {
    async fn start(&self) -> ControlResult {
        if self.is_active().await? {
            return Ok(ControlOutcome::AlreadyInDesiredState);
        }
        self.run_systemctl("start").await?;
        Ok(ControlOutcome::Ok)
    }

    async fn stop(&self) -> ControlResult {
        if !self.is_active().await? {
            return Ok(ControlOutcome::AlreadyInDesiredState);
        }
        self.run_systemctl("stop").await?;
        Ok(ControlOutcome::Ok)
    }

    async fn is_active(&self) -> Result<bool, SupervisorError> {
        let mut command = Command::new("systemctl");
        command.arg("is-active").arg(&self.unit_name);

        let output = timeout(CONTROL_TIMEOUT, command.output())
            .await
            .map_err(|_| SupervisorError::Timeout)?
            .map_err(|e| SupervisorError::Other(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.trim() == "active")
    }
}

/// In-memory [`ServiceController`] used by decision-engine unit tests, so
/// hysteresis logic can be exercised without a real `systemctl` binary.
#[derive(Default)]
pub struct FakeController {
    active: parking_lot::Mutex<bool>,
    pub fail_next: parking_lot::Mutex<Option<SupervisorError>>,
}

impl FakeController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ServiceController for FakeController {
    async fn start(&self) -> ControlResult {
        if let Some(e) = self.fail_next.lock().take() {
            return Err(e);
        }
        let mut active = self.active.lock();
        if *active {
            return Ok(ControlOutcome::AlreadyInDesiredState);
        }
        *active = true;
        Ok(ControlOutcome::Ok)
    }

    async fn stop(&self) -> ControlResult {
        if let Some(e) = self.fail_next.lock().take() {
            return Err(e);
        }
        let mut active = self.active.lock();
        if !*active {
            return Ok(ControlOutcome::AlreadyInDesiredState);
        }
        *active = false;
        Ok(ControlOutcome::Ok)
    }

    async fn is_active(&self) -> Result<bool, SupervisorError> {
        Ok(*self.active.lock())
    }
}
