//! System API (health).

use crate::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connected_clients: usize,
    download_active: bool,
    download_progress: i64,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<impl Serialize> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connected_clients: state.registry.len().await,
        download_active: state.downloads.is_active(),
        download_progress: state.downloads.progress(),
    })
}
