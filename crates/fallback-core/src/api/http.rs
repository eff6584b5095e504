//! HTTP route handlers and router assembly for the Ingress HTTP Server
//! (spec.md §4.2, component C2).
//!
//! Grounded on the teacher's `packages/thaumic-core/src/api/http.rs`
//! (`create_router`, extractor conventions) with the JSON body parsed by
//! hand rather than via axum's `Json` extractor, so a malformed payload maps
//! to this crate's own `FallbackError::MalformedRequest` instead of axum's
//! opaque rejection response.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Router};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;

use super::response::api_success;
use super::{auth_middleware, health_check, AppState};
use crate::error::FallbackError;
use crate::model::HeartbeatReport;

/// Maximum accepted request body size (spec.md §4.2: "rejects bodies over 64
/// KiB with 413").
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Builds the full router: `/status` (POST ingest, GET snapshot) behind the
/// bearer-auth middleware, `/health` open to anyone.
pub fn create_router(state: AppState) -> Router {
    let status_routes = Router::new()
        .route("/status", post(post_status).get(get_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    Router::new()
        .merge(status_routes)
        .route("/health", get(health_check))
        .with_state(state)
}

/// `POST /status`: ingests one heartbeat report from the primary.
///
/// Parses the body manually so a malformed payload surfaces as
/// [`FallbackError::MalformedRequest`] rather than axum's built-in
/// rejection, keeping every error response on this crate's JSON error shape.
async fn post_status(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> Response {
    let mut report: HeartbeatReport = match serde_json::from_slice(&body) {
        Ok(report) => report,
        Err(e) => return FallbackError::MalformedRequest(e.to_string()).into_response(),
    };

    if let Some(ConnectInfo(addr)) = connect_info {
        report.source_address = addr.ip().to_string();
    }
    let received_at_ms = state.store.append(report);
    let received_at = millis_to_rfc3339(received_at_ms);

    api_success(json!({ "ok": true, "receivedAt": received_at })).into_response()
}

/// Formats a milliseconds-since-epoch timestamp as RFC3339, matching the
/// `receivedAt` field's ISO8601 wire shape (spec.md §6).
fn millis_to_rfc3339(millis: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis as i64)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    records: Vec<HeartbeatReport>,
    fallback_active: bool,
    last_decision: String,
    decided_at: String,
}

/// `GET /status`: returns the current record window plus the decision
/// engine's derived state (spec.md §4.2).
async fn get_status(State(state): State<AppState>) -> Response {
    let (last_decision, decided_at) = state.engine.last_decision();
    api_success(StatusResponse {
        records: state.store.snapshot(),
        fallback_active: state.engine.controller_state().fallback_active,
        last_decision,
        decided_at,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionConfig;
    use crate::supervisor::FakeController;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::store::HeartbeatStore::new(
            dir.path().join("state.json"),
            300,
            100,
        ));
        let controller = Arc::new(FakeController::new());
        let engine = Arc::new(crate::decision::DecisionEngine::new(
            store.clone(),
            controller,
            DecisionConfig::default(),
            None,
        ));
        AppState {
            store,
            engine,
            auth: Arc::new(super::super::AuthConfig::default()),
        }
    }

    #[tokio::test]
    async fn malformed_json_body_returns_400_with_error_shape() {
        let router = create_router(state());
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/status")
                    .header("content-type", "application/json")
                    .body(Body::from("{ not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn valid_report_is_accepted_and_visible_in_get_status() {
        let s = state();
        let router = create_router(s.clone());
        let body = json!({
            "streamingActive": true,
            "ffmpegRunning": true,
            "dayWindowActive": true,
        })
        .to_string();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/status")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(parsed["ok"], json!(true));
        assert!(parsed["receivedAt"].as_str().is_some());

        assert_eq!(s.store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_with_413() {
        let router = create_router(state());
        let oversized = "a".repeat(MAX_BODY_BYTES + 1);
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/status")
                    .header("content-type", "application/json")
                    .body(Body::from(oversized))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
