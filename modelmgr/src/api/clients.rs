//! 接続クライアントと配布状態の参照API

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::error::AppError;
use crate::registry::ConnectedClient;
use crate::types::ClientFile;
use crate::AppState;

/// 接続一覧レスポンス
#[derive(Debug, Serialize)]
pub struct ClientListResponse {
    /// 接続中クライアント（ID順）
    pub clients: Vec<ConnectedClient>,
}

/// GET /api/clients
pub async fn list_clients(State(state): State<AppState>) -> Json<ClientListResponse> {
    Json(ClientListResponse {
        clients: state.registry.list().await,
    })
}

/// `GET /api/client-files/pending` のクエリ
#[derive(Debug, Default, Deserialize)]
pub struct PendingQuery {
    /// 対象クライアント
    pub client_id: Option<String>,
    /// 最終更新からの経過秒数の下限
    pub older_than_secs: Option<u64>,
}

/// GET /api/client-files/pending
///
/// 完了通知が届いていない配布を返す。状態は変えない。
pub async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<Vec<ClientFile>>, AppError> {
    let client_id = query.client_id.as_deref().filter(|id| !id.is_empty());
    let older_than = query
        .older_than_secs
        .map(|secs| chrono::Duration::seconds(secs.min(u32::MAX as u64) as i64));

    let rows = state.client_files.list_pending(client_id, older_than).await?;
    Ok(Json(rows))
}
