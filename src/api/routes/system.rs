//! System handlers

use axum::{Json, response::IntoResponse};
use serde_json::json;

/// GET / - Service status
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "vod_archiver": { "version": env!("CARGO_PKG_VERSION") },
        "api": { "version": 1 },
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}
