//! Work queue handlers

use crate::api::AppState;
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

fn not_found(vid: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "vid": vid,
            "status": "not_found",
        })),
    )
        .into_response()
}

/// PUT|POST /archive/:id - Queue an item
pub async fn add_item(
    State(state): State<AppState>,
    Path(vid): Path<String>,
) -> Result<impl IntoResponse> {
    let id = state.grammar.parse(&vid)?;
    let entry = state.queue.enqueue(id).await;
    Ok(Json(json!({
        "success": true,
        "vid": entry.id,
    })))
}

/// GET /archive - List every entry, sorted by enqueue time
pub async fn list_items(State(state): State<AppState>) -> impl IntoResponse {
    let items = state.queue.list().await;
    Json(json!({
        "success": true,
        "total_tasks_queued": state.queue.pending_len().await,
        "items": items,
    }))
}

/// GET /archive/:id - Status and position of one entry
pub async fn get_item(
    State(state): State<AppState>,
    Path(vid): Path<String>,
) -> Result<Response> {
    let id = state.grammar.parse(&vid)?;
    let Some((entry, queue_index)) = state.queue.get(&id).await else {
        return Ok(not_found(&vid));
    };
    Ok(Json(json!({
        "success": true,
        "vid": entry.id,
        "status": entry.status,
        "queue_index": queue_index,
        "added_at": entry.added_at,
        "error": entry.error,
    }))
    .into_response())
}

/// DELETE /archive/:id - Remove a still-pending entry
pub async fn remove_item(
    State(state): State<AppState>,
    Path(vid): Path<String>,
) -> Result<Response> {
    let id = state.grammar.parse(&vid)?;
    let Some(queue_index) = state.queue.remove_pending(&id).await else {
        return Ok(not_found(&vid));
    };
    Ok(Json(json!({
        "success": true,
        "vid": id,
        "result": "removed",
        "queue_index": queue_index,
    }))
    .into_response())
}
