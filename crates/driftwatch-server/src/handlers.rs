//! Route handlers. Each one is a thin shim over the dispatcher or a repo.

use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use chrono::Utc;
use driftwatch_core::ids::{EventId, SourceId};
use driftwatch_engine::{PollReport, Synthesis, TickReport};
use driftwatch_store::{
    ContextRejectionRepo, ContextRejectionRow, DriftScoreRepo, DriftScoreRow, EventRepo, EventRow,
    MemoryHoleRepo, MemoryHoleRow, PollCycleRepo, PollCycleRow, SearchResultRepo, SearchResultRow,
    SnapshotRepo, SnapshotRow,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::health::{self, HealthResponse};
use crate::server::AppState;

const DEFAULT_TIMELINE_LIMIT: u32 = 50;
const MAX_TIMELINE_LIMIT: u32 = 500;

/// With no secret configured every caller is accepted.
pub fn is_authorized(headers: &HeaderMap, secret: Option<&SecretString>) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret.expose_secret())
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.dispatcher.in_flight().len(),
    ))
}

/// GET /api/cron/poll
pub async fn cron_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TickReport>, ApiError> {
    if !is_authorized(&headers, state.cron_secret.as_ref()) {
        warn!("cron trigger rejected: bad or missing bearer token");
        return Err(ApiError::Unauthorized);
    }
    let report = state.dispatcher.tick(Utc::now())?;
    Ok(Json(report))
}

/// POST /api/events/{id}/poll
pub async fn trigger_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let event_id = EventId::from_raw(id);
    state.dispatcher.trigger(&event_id)?;
    info!(event_id = %event_id, "manual poll queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "event_id": event_id, "status": "queued" })),
    ))
}

/// POST /api/events/{id}/poll-direct
pub async fn poll_direct(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PollReport>, ApiError> {
    let event_id = EventId::from_raw(id);
    let report = state.dispatcher.poll_inline(&event_id).await?;
    Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
pub struct SynthesizeRequest {
    /// Sources to ground on; the event's active sources when absent.
    #[serde(default)]
    pub source_ids: Option<Vec<SourceId>>,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// POST /api/events/{id}/synthesize
pub async fn synthesize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SynthesizeRequest>,
) -> Result<Json<Synthesis>, ApiError> {
    let event_id = EventId::from_raw(id);
    let synthesis = state
        .dispatcher
        .synthesize(&event_id, body.source_ids.as_deref(), body.model_id.as_deref())
        .await?;
    Ok(Json(synthesis))
}

#[derive(Debug, Default, Deserialize)]
pub struct TimelineParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct Timeline {
    pub event: EventRow,
    pub poll_cycles: Vec<PollCycleRow>,
    pub snapshots: Vec<SnapshotRow>,
    pub drift_scores: Vec<DriftScoreRow>,
    pub memory_holes: Vec<MemoryHoleRow>,
    pub search_results: Vec<SearchResultRow>,
    pub context_rejections: Vec<ContextRejectionRow>,
}

/// GET /api/events/{id}/timeline
pub async fn timeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<Timeline>, ApiError> {
    let event_id = EventId::from_raw(id);
    let limit = params
        .limit
        .unwrap_or(DEFAULT_TIMELINE_LIMIT)
        .clamp(1, MAX_TIMELINE_LIMIT);
    let db = &state.db;

    let event = EventRepo::new(db.clone())
        .find(&event_id)?
        .ok_or_else(|| ApiError::NotFound(format!("event not found: {event_id}")))?;

    Ok(Json(Timeline {
        poll_cycles: PollCycleRepo::new(db.clone()).list_for_event(&event_id, limit)?,
        snapshots: SnapshotRepo::new(db.clone()).list_for_event(&event_id, limit)?,
        drift_scores: DriftScoreRepo::new(db.clone()).list_for_event(&event_id, limit)?,
        memory_holes: MemoryHoleRepo::new(db.clone()).list_for_event(&event_id, limit)?,
        search_results: SearchResultRepo::new(db.clone()).list_for_event(&event_id, limit)?,
        context_rejections: ContextRejectionRepo::new(db.clone()).list_for_event(&event_id, limit)?,
        event,
    }))
}
