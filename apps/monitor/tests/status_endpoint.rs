//! Integration test for the ingress HTTP server, driving the `axum::Router`
//! directly with `tower::ServiceExt::oneshot` (spec.md §8: "a record posted
//! to POST /status appears in GET /status within one tick").

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use fallback_core::api::http::create_router;
use fallback_core::{bootstrap_services, BootstrapConfig, DecisionConfig};
use serde_json::json;
use tower::ServiceExt;

fn bootstrap(token: Option<&str>) -> fallback_core::BootstrappedServices {
    let dir = tempfile::tempdir().unwrap();
    bootstrap_services(BootstrapConfig {
        state_file_path: dir.path().join("state.json"),
        history_window_seconds: 300,
        max_records: 100,
        encoder_unit_name: "fallback-encoder.service".to_string(),
        elevation_wrapper: None,
        decision: DecisionConfig::default(),
        auth_token: token.map(str::to_string),
        recovery_probe: None,
    })
}

#[tokio::test]
async fn posted_report_appears_in_get_status_within_one_tick() {
    let services = bootstrap(None);
    let router = create_router(services.app_state.clone());

    let body = json!({
        "streamingActive": true,
        "ffmpegRunning": true,
        "dayWindowActive": true,
        "cameraSignalAvailable": true,
        "cameraNetworkReachable": true,
    })
    .to_string();

    let post_response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/status")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(post_response.status(), StatusCode::OK);

    let get_response = router
        .oneshot(
            Request::builder()
                .uri("/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(get_response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(get_response.into_body(), usize::MAX)
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["records"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn request_without_bearer_token_is_rejected_and_store_is_unchanged() {
    let services = bootstrap(Some("secret-token"));
    let router = create_router(services.app_state.clone());

    let body = json!({ "streamingActive": true }).to_string();

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/status")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(services.store.is_empty());
}

#[tokio::test]
async fn request_with_correct_bearer_token_is_accepted() {
    let services = bootstrap(Some("secret-token"));
    let router = create_router(services.app_state.clone());

    let body = json!({ "streamingActive": true }).to_string();

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/status")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, "Bearer secret-token")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(services.store.snapshot().len(), 1);
}
