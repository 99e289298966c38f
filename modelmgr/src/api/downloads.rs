//! ダウンロード進捗・キャンセルAPI

use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::info;

use super::error::AppError;
use crate::common::error::MmError;
use crate::AppState;

/// GET /api/download/progress
pub async fn get_progress(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "progress": state.downloads.progress() }))
}

/// POST /api/download/cancel
///
/// 何度呼んでも安全。ファイル削除に失敗したときだけ500。
pub async fn cancel(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let cancelled = state
        .downloads
        .cancel_active()
        .await
        .map_err(|e| MmError::Io(e.to_string()))?;

    let message = if cancelled {
        info!("Active download cancelled by request");
        "Download cancelled"
    } else {
        "No active download"
    };
    Ok(Json(json!({ "message": message })))
}
