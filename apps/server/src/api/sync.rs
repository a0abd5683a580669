//! Offline sync endpoints.
//!
//! Operations that can start a drain run it on a spawned task, so a client
//! that disconnects mid-request does not cancel a drain halfway through.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post, put},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use marksync_core::sync::{
    ConnectivityEvent, DrainOutcome, DrainTrigger, ModeChangeReport, MutationAction,
    MutationRecord, SubmitOutcome, SyncStatusSnapshot,
};

use crate::error::ApiResult;
use crate::events::{ServerEvent, SYNC_STATUS};
use crate::main_lib::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueResponse {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct RetryFailedQuery {
    #[serde(default)]
    drain: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetryFailedResponse {
    reset_count: usize,
    drain: Option<DrainOutcome>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClearFailedResponse {
    cleared_count: usize,
}

#[derive(Debug, Deserialize)]
struct OnlineRequest {
    online: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectivityResponse {
    transition: Option<ConnectivityEvent>,
    status: SyncStatusSnapshot,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn detached<T, F>(future: F) -> ApiResult<T>
where
    F: Future<Output = marksync_core::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::spawn(future).await??)
}

fn publish_status(state: &AppState) {
    match serde_json::to_value(state.sync.status()) {
        Ok(payload) => state
            .event_bus
            .publish(ServerEvent::with_payload(SYNC_STATUS, payload)),
        Err(err) => debug!("Failed to serialize sync status: {}", err),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn list_queue(State(state): State<Arc<AppState>>) -> Json<Vec<MutationRecord>> {
    Json(state.sync.list())
}

async fn enqueue_mutation(
    State(state): State<Arc<AppState>>,
    Json(action): Json<MutationAction>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    let id = state.sync.enqueue(action)?;
    publish_status(&state);
    Ok((StatusCode::CREATED, Json(EnqueueResponse { id })))
}

async fn submit_mutation(
    State(state): State<Arc<AppState>>,
    Json(action): Json<MutationAction>,
) -> ApiResult<Json<SubmitOutcome>> {
    let sync = state.sync.clone();
    let outcome = detached(async move { sync.submit(action).await }).await?;
    publish_status(&state);
    Ok(Json(outcome))
}

async fn discard_mutation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<MutationRecord>> {
    let record = state.sync.discard(&id)?;
    publish_status(&state);
    Ok(Json(record))
}

async fn drain_queue(State(state): State<Arc<AppState>>) -> ApiResult<Json<DrainOutcome>> {
    info!("Manual drain requested");
    let sync = state.sync.clone();
    let outcome = detached(async move { sync.drain(DrainTrigger::Manual).await }).await?;
    publish_status(&state);
    Ok(Json(outcome))
}

async fn retry_failed(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RetryFailedQuery>,
) -> ApiResult<Json<RetryFailedResponse>> {
    let reset_count = state.sync.retry_failed()?;
    let drain = if query.drain && reset_count > 0 {
        let sync = state.sync.clone();
        Some(detached(async move { sync.drain(DrainTrigger::Manual).await }).await?)
    } else {
        None
    };
    publish_status(&state);
    Ok(Json(RetryFailedResponse { reset_count, drain }))
}

async fn clear_failed(State(state): State<Arc<AppState>>) -> ApiResult<Json<ClearFailedResponse>> {
    let cleared_count = state.sync.clear_failed()?;
    publish_status(&state);
    Ok(Json(ClearFailedResponse { cleared_count }))
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<SyncStatusSnapshot> {
    Json(state.sync.status())
}

async fn set_mode(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OnlineRequest>,
) -> ApiResult<Json<ModeChangeReport>> {
    let sync = state.sync.clone();
    let report = detached(async move { sync.set_mode(request.online).await }).await?;
    publish_status(&state);
    Ok(Json(report))
}

async fn toggle_mode(State(state): State<Arc<AppState>>) -> ApiResult<Json<ModeChangeReport>> {
    let sync = state.sync.clone();
    let report = detached(async move { sync.toggle_mode().await }).await?;
    publish_status(&state);
    Ok(Json(report))
}

async fn report_connectivity(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OnlineRequest>,
) -> Json<ConnectivityResponse> {
    let transition = state.sync.report_network(request.online);
    if transition.is_some() {
        publish_status(&state);
    }
    Json(ConnectivityResponse {
        transition,
        status: state.sync.status(),
    })
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(state.event_bus.sse_stream()).keep_alive(KeepAlive::default())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/queue", get(list_queue).post(enqueue_mutation))
        .route("/queue/:id", delete(discard_mutation))
        .route("/submit", post(submit_mutation))
        .route("/drain", post(drain_queue))
        .route("/retry-failed", post(retry_failed))
        .route("/clear-failed", post(clear_failed))
        .route("/status", get(get_status))
        .route("/mode", put(set_mode))
        .route("/mode/toggle", post(toggle_mode))
        .route("/connectivity", put(report_connectivity))
        .route("/events", get(stream_events))
}
