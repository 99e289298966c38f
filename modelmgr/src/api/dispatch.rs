//! ディスパッチAPI

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde_json::{json, Value};

use super::error::AppError;
use crate::common::error::MmError;
use crate::common::protocol::DispatchRequest;
use crate::AppState;

/// POST /api/dispatch
///
/// 不正なボディ（未知のaction含む）は400。
pub async fn dispatch(
    State(state): State<AppState>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = payload
        .map_err(|e| MmError::validation(format!("Invalid request body: {}", e.body_text())))?;

    state.dispatch.dispatch(&request).await?;
    Ok(Json(json!({ "status": "dispatched" })))
}
