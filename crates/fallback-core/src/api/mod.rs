//! Ingress HTTP Server (spec.md §4.2, component C2).

pub mod http;
pub mod response;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::decision::DecisionEngine;
use crate::error::FallbackError;
use crate::store::HeartbeatStore;

/// Bearer-token authentication policy for the ingress server.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// The expected token. `None` means no authentication is enforced.
    pub token: Option<String>,
}

/// Shared state for the ingress HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<HeartbeatStore>,
    pub engine: Arc<DecisionEngine>,
    pub auth: Arc<AuthConfig>,
}

/// Rejects requests missing or mismatching the configured bearer token.
/// A no-op when no token is configured (spec.md §4.2).
pub async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.auth.token.as_deref() else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided == Some(expected) {
        next.run(req).await
    } else {
        FallbackError::AuthFailure.into_response()
    }
}

/// Liveness probe, unauthenticated, for operator tooling and the service
/// manager's health checks.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
