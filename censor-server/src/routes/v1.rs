//! `/v1` introspection endpoints: list running streams and fetch one
//! stream's snapshot. Read-only — this process does not accept frame
//! ingress over HTTP, it only reports on engines started in-process.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::errors::AppError;
use censor_core::{EngineSnapshot, StreamId};

#[derive(Debug, Serialize)]
struct StreamSummary {
    stream_id: Uuid,
    state: censor_core::EngineState,
    degraded: bool,
}

pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/streams", get(list_streams))
        .route("/streams/{stream_id}", get(stream_stats))
}

async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamSummary>> {
    let summaries = state
        .registry
        .snapshots()
        .into_iter()
        .map(|snapshot| StreamSummary {
            stream_id: snapshot.stream_id.0,
            state: snapshot.state,
            degraded: snapshot.degraded,
        })
        .collect();
    Json(summaries)
}

async fn stream_stats(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
) -> Result<Json<EngineSnapshot>, AppError> {
    let handle = state
        .registry
        .get(StreamId(stream_id))
        .ok_or_else(|| AppError::not_found(format!("no stream with id {stream_id}")))?;
    Ok(Json(handle.snapshot()))
}
