//! Integration tests for the gateway's HTTP surface.
//!
//! These verify:
//!  - Every route is wired (no 404/405 for the wrong reason).
//!  - `GET /api/stats` returns the full observability shape.
//!  - `GET /api/audio/{hash}` serves cached bytes with the duration
//!    header, 404s on unknown hashes.
//!  - `GET /ws` rejects a request with no user identity before upgrading.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;

use lectern_axum::bootstrap::bootstrap;
use lectern_axum::routes::{CorsConfig, create_router};
use lectern_core::ports::AudioCache as _;
use lectern_core::settings::Settings;
use lectern_core::variant::VariantHash;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn test_settings() -> Settings {
    Settings {
        queue_poll_interval_ms: 20,
        models: vec!["m1".to_string()],
        ..Settings::default()
    }
}

async fn parse_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap_or_else(|e| panic!("Expected valid JSON body: {e}"))
}

// ── GET /api/health ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_returns_ok_json() {
    let gateway = bootstrap(test_settings()).unwrap();
    let app = create_router(gateway.state.clone(), &CorsConfig::AllowAll);

    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = parse_json(response).await;
    assert_eq!(json["status"], "ok");

    gateway.coordinator.shutdown().await;
}

// ── GET /api/stats ───────────────────────────────────────────────────────────

#[tokio::test]
async fn stats_exposes_cache_queues_and_metrics() {
    let gateway = bootstrap(test_settings()).unwrap();
    let app = create_router(gateway.state.clone(), &CorsConfig::AllowAll);

    let response = app
        .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = parse_json(response).await;
    assert!(json["cache"].get("sizeBytes").is_some());
    assert_eq!(json["queues"][0]["modelId"], "m1");
    assert_eq!(json["queues"][0]["depth"], 0);
    assert_eq!(json["inFlight"], 0);
    assert!(json["metrics"].get("completions").is_some());

    gateway.coordinator.shutdown().await;
}

// ── GET /api/audio/{variant_hash} ────────────────────────────────────────────

#[tokio::test]
async fn audio_serves_cached_bytes_with_duration_header() {
    let gateway = bootstrap(test_settings()).unwrap();
    let hash = VariantHash::from_hex("cafe01");
    gateway
        .state
        .cache
        .put(&hash, Bytes::from_static(b"pcm-bytes"), 2400, "m1", "v1")
        .await
        .unwrap();

    let app = create_router(gateway.state.clone(), &CorsConfig::AllowAll);
    let response = app
        .oneshot(Request::builder().uri("/api/audio/cafe01").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-audio-duration-ms").unwrap().to_str().unwrap(),
        "2400"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), b"pcm-bytes");

    gateway.coordinator.shutdown().await;
}

#[tokio::test]
async fn audio_unknown_hash_is_404() {
    let gateway = bootstrap(test_settings()).unwrap();
    let app = create_router(gateway.state.clone(), &CorsConfig::AllowAll);

    let response = app
        .oneshot(Request::builder().uri("/api/audio/ffff").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    gateway.coordinator.shutdown().await;
}

// ── GET /api/dlq/{model_id} ──────────────────────────────────────────────────

#[tokio::test]
async fn dlq_listing_is_empty_json_array_when_clean() {
    let gateway = bootstrap(test_settings()).unwrap();
    let app = create_router(gateway.state.clone(), &CorsConfig::AllowAll);

    let response = app
        .oneshot(Request::builder().uri("/api/dlq/m1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(parse_json(response).await, serde_json::json!([]));

    gateway.coordinator.shutdown().await;
}

// ── GET /ws ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ws_route_exists_and_is_not_a_plain_get() {
    let gateway = bootstrap(test_settings()).unwrap();
    let app = create_router(gateway.state.clone(), &CorsConfig::AllowAll);

    // No upgrade headers: the route must exist (not 404/405) and refuse to
    // serve a plain GET.
    let response = app
        .oneshot(Request::builder().uri("/ws?user=u1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_ne!(response.status(), StatusCode::NOT_FOUND);
    assert_ne!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(response.status().is_client_error());

    gateway.coordinator.shutdown().await;
}
