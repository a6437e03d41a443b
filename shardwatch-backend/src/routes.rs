use crate::AppState;
use crate::error::AppError;
use crate::helpers::{now_millis, tokens_match};
use crate::ingest;
use crate::roster::Shard;
use crate::validation;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::TypedHeader;
use axum_macros::debug_handler;
use headers::Authorization;
use headers::authorization::Bearer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

type BearerAuth = Option<TypedHeader<Authorization<Bearer>>>;

/// Reject unless the request carries `expected` as its bearer token. An
/// unset token refuses everything.
fn require_token(expected: Option<&str>, auth: &BearerAuth) -> Result<(), AppError> {
    match (expected, auth) {
        (Some(expected), Some(TypedHeader(auth))) if tokens_match(expected, auth.token()) => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

// =============================================================================
// Ingestion
// =============================================================================

#[derive(Serialize)]
pub(crate) struct IngestResponse {
    shard: String,
    recorded: usize,
    dropped: usize,
}

#[debug_handler]
pub(crate) async fn ingest(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
    Json(poll): Json<ingest::Poll>,
) -> Result<impl IntoResponse, AppError> {
    require_token(state.ingest_token.as_deref(), &auth)?;
    let shard = Shard::parse(&poll.shard)?;
    validation::validate_poll_size(poll.players.len())?;

    let ts = poll
        .ts
        .filter(|&ts| validation::is_plausible_timestamp(ts))
        .unwrap_or_else(now_millis);
    let prepared = ingest::prepare(&shard, poll.players, ts);
    let dropped = prepared.dropped;

    state.roster.sync_shard(&shard, prepared.online, ts).await;
    let recorded = state.db.record_observations(prepared.observations).await?;
    tracing::debug!(shard = %shard.key, recorded, dropped, "ingested poll");

    Ok((
        StatusCode::OK,
        Json(IngestResponse {
            shard: shard.key.to_string(),
            recorded,
            dropped,
        }),
    ))
}

// =============================================================================
// Timelines
// =============================================================================

#[derive(Deserialize)]
pub(crate) struct TimelineQuery {
    window: Option<String>,
    tz: Option<String>,
}

pub(crate) async fn activity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TimelineQuery>,
) -> Result<impl IntoResponse, AppError> {
    let class = validation::coerce_window(query.window.as_deref());
    let tz = validation::coerce_tz_offset(query.tz.map(Value::String).as_ref());
    let timeline = state.db.timeline(id, class, tz, now_millis()).await?;
    Ok(Json(timeline))
}

#[derive(Deserialize)]
pub(crate) struct BatchRequest {
    #[serde(default)]
    ids: Value,
    #[serde(default)]
    window: Value,
    #[serde(default)]
    tz: Value,
}

pub(crate) async fn activity_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ids = request
        .ids
        .as_array()
        .map(|raw| validation::coerce_batch_ids(raw))
        .unwrap_or_default();
    let class = validation::coerce_window(request.window.as_str());
    let tz = validation::coerce_tz_offset(Some(&request.tz));
    let batch = state.db.batch_timeline(ids, class, tz, now_millis()).await?;
    Ok(Json(batch))
}

// =============================================================================
// Players and roster
// =============================================================================

pub(crate) async fn player(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_player_id(&id)?;
    let snapshot = state
        .db
        .snapshot(id)
        .await?
        .ok_or(AppError::NotFound("Player not found"))?;
    Ok(Json(snapshot))
}

pub(crate) async fn mapping(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.db.snapshot_all().await?))
}

pub(crate) async fn online(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.roster.summaries().await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ShardRosterResponse {
    shard: String,
    polled_at: Option<i64>,
    players: Vec<crate::roster::OnlinePlayer>,
}

pub(crate) async fn online_shard(
    State(state): State<Arc<AppState>>,
    Path(shard): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let shard = Shard::parse(&shard)?;
    let (players, polled_at) = match state.roster.get_shard(&shard).await {
        Some((players, polled_at)) => (players, Some(polled_at)),
        None => (Vec::new(), None),
    };
    Ok(Json(ShardRosterResponse {
        shard: shard.key.to_string(),
        polled_at,
        players,
    }))
}

// =============================================================================
// Administration
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RealNameRequest {
    real_name: Option<String>,
}

#[debug_handler]
pub(crate) async fn set_real_name(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
    Path(id): Path<String>,
    Json(payload): Json<RealNameRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_token(state.admin_token.as_deref(), &auth)?;
    validation::validate_player_id(&id)?;
    let real_name = payload
        .real_name
        .as_deref()
        .map(validation::validate_real_name)
        .transpose()?;

    let snapshot = state.db.set_real_name(id.clone(), real_name).await?;
    tracing::info!(player = %id, "real name updated");
    Ok(Json(snapshot))
}

pub(crate) async fn delete_player(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    require_token(state.admin_token.as_deref(), &auth)?;
    validation::validate_player_id(&id)?;
    if !state.db.delete_player(id.clone()).await? {
        return Err(AppError::NotFound("Player not found"));
    }
    tracing::info!(player = %id, "player deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub(crate) struct FlushResponse {
    written: usize,
    failed: usize,
}

pub(crate) async fn flush(State(state): State<Arc<AppState>>, auth: BearerAuth) -> Result<impl IntoResponse, AppError> {
    require_token(state.admin_token.as_deref(), &auth)?;
    let report = state.db.flush().await?;
    Ok(Json(FlushResponse {
        written: report.written,
        failed: report.failed,
    }))
}

#[derive(Serialize)]
pub(crate) struct ResetResponse {
    removed: usize,
}

pub(crate) async fn reset(State(state): State<Arc<AppState>>, auth: BearerAuth) -> Result<impl IntoResponse, AppError> {
    require_token(state.admin_token.as_deref(), &auth)?;
    let removed = state.db.reset().await?;
    tracing::warn!(removed, "store reset");
    Ok(Json(ResetResponse { removed }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CleanupResponse {
    removed_pending: usize,
    removed_anonymous_names: usize,
    pruned_empty_players: usize,
    pruned_history: usize,
}

pub(crate) async fn cleanup(State(state): State<Arc<AppState>>, auth: BearerAuth) -> Result<impl IntoResponse, AppError> {
    require_token(state.admin_token.as_deref(), &auth)?;
    let report = state.db.cleanup(now_millis()).await?;
    tracing::info!(?report, "cleanup finished");
    Ok(Json(CleanupResponse {
        removed_pending: report.removed_pending,
        removed_anonymous_names: report.removed_anonymous_names,
        pruned_empty_players: report.pruned_empty_players,
        pruned_history: report.pruned_history,
    }))
}

#[derive(Serialize)]
pub(crate) struct StatsResponse {
    cached: usize,
    dirty: usize,
    capacity: usize,
}

pub(crate) async fn stats(State(state): State<Arc<AppState>>, auth: BearerAuth) -> Result<impl IntoResponse, AppError> {
    require_token(state.admin_token.as_deref(), &auth)?;
    let stats = state.db.stats().await?;
    Ok(Json(StatsResponse {
        cached: stats.cached,
        dirty: stats.dirty,
        capacity: stats.capacity,
    }))
}
