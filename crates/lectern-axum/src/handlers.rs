//! HTTP handlers: WebSocket upgrade, audio by content address, health,
//! stats.

use std::collections::HashMap;

use axum::Json;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use lectern_core::ports::{
    AudioCache as _, CacheStats, InFlightRegistry as _, JobQueue as _, StoreError,
};
use lectern_core::variant::VariantHash;
use lectern_coordinator::MetricsSnapshot;

use crate::error::HttpError;
use crate::session::handle_socket;
use crate::state::AppState;

/// Header set by the authenticating proxy in front of the gateway.
const USER_HEADER: &str = "x-lectern-user";

/// `GET /ws` — upgrade to the synthesis WebSocket.
///
/// Identity comes from `x-lectern-user` (upstream auth middleware) with a
/// `?user=` query fallback for development. No identity, no session.
pub async fn synthesis_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, HttpError> {
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| params.get("user").cloned())
        .filter(|user| !user.is_empty())
        .ok_or_else(|| HttpError::BadRequest("missing user identity".to_string()))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

/// `GET /api/audio/{variant_hash}` — serve a cached artifact.
pub async fn audio(
    State(state): State<AppState>,
    Path(variant_hash): Path<String>,
) -> Result<Response, HttpError> {
    let hash = VariantHash::from_hex(variant_hash);
    let entry = state
        .cache
        .get(&hash)
        .await
        .map_err(|err| HttpError::StoreUnavailable(err.to_string()))?
        .ok_or_else(|| HttpError::NotFound(format!("no cached audio for {hash}")))?;

    let headers = [
        (CONTENT_TYPE, "application/octet-stream".to_string()),
        (
            axum::http::HeaderName::from_static("x-audio-duration-ms"),
            entry.audio_duration_ms.to_string(),
        ),
    ];
    Ok((headers, entry.audio).into_response())
}

/// `GET /api/health` — liveness.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Per-model queue gauge for the stats payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueGauge {
    pub model_id: String,
    pub depth: usize,
    pub dlq_depth: usize,
}

/// `GET /api/stats` response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub cache: CacheStats,
    pub queues: Vec<QueueGauge>,
    pub in_flight: usize,
    pub channels: usize,
    pub metrics: MetricsSnapshot,
}

/// `GET /api/dlq/{model_id}` — dead-letter entries for operator
/// inspection. Read-only: re-enqueueing is a human decision.
pub async fn dlq(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<Vec<lectern_core::domain::DlqEntry>>, HttpError> {
    let entries = state.queue.dlq_entries(&model_id).await.map_err(store_error)?;
    Ok(Json(entries))
}

/// `GET /api/stats` — coordinator observability snapshot.
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, HttpError> {
    let mut queues = Vec::with_capacity(state.settings.models.len());
    for model_id in &state.settings.models {
        let depth = state.queue.depth(model_id).await.map_err(store_error)?;
        let dlq_depth = state.queue.dlq_depth(model_id).await.map_err(store_error)?;
        queues.push(QueueGauge { model_id: model_id.clone(), depth, dlq_depth });
    }

    Ok(Json(StatsResponse {
        cache: state.cache.stats().await,
        queues,
        in_flight: state.inflight.in_flight_count().await,
        channels: state.bus.channel_count(),
        metrics: state.metrics.snapshot(),
    }))
}

fn store_error(err: StoreError) -> HttpError {
    HttpError::StoreUnavailable(err.to_string())
}
