//! カタログ同期API
//!
//! 同期処理は別タスクで実行する。呼び出し元が切断してハンドラの
//! future が破棄されても、ワーカーは最後まで走る。

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::future::Future;
use tracing::{error, info, warn};

use super::error::AppError;
use crate::civitai::RemoteError;
use crate::common::error::MmError;
use crate::sync::{IngestError, RefreshFields, SyncReport};
use crate::types::Version;
use crate::AppState;

/// 同期処理をリクエストから切り離して実行し、完了を待つ
async fn detached<F, T>(work: F) -> Result<T, MmError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work).await.map_err(|e| {
        error!(error = %e, "Sync task failed");
        MmError::Internal(format!("sync task failed: {}", e))
    })
}

/// POST /api/sync
pub async fn sync_all(State(state): State<AppState>) -> Result<Json<SyncReport>, AppError> {
    let synchronizer = state.synchronizer.clone();
    let api_key = state.civitai_api_key.clone();
    let report = detached(async move { synchronizer.sync_all(api_key.as_deref()).await })
        .await?
        .map_err(|e| remote_error(e, "Model list"))?;
    info!(?report, "Catalog sync finished");
    Ok(Json(report))
}

/// POST /api/sync/{id}
pub async fn sync_model(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
) -> Result<Json<SyncReport>, AppError> {
    let synchronizer = state.synchronizer.clone();
    let api_key = state.civitai_api_key.clone();
    let report = detached(async move {
        synchronizer
            .sync_model(model_id, api_key.as_deref())
            .await
    })
    .await?
    .map_err(|e| remote_error(e, "Model"))?;
    info!(model_id, ?report, "Model sync finished");
    Ok(Json(report))
}

/// `POST /api/sync/version/{version_id}` のクエリ
#[derive(Debug, Default, Deserialize)]
pub struct SyncVersionQuery {
    /// `0` / `false` でファイル取得を省く
    pub download: Option<String>,
    /// バージョン詳細が取れないときに探すモデル
    #[serde(rename = "modelId")]
    pub model_id: Option<i64>,
}

impl SyncVersionQuery {
    fn wants_download(&self) -> bool {
        !matches!(
            self.download.as_deref().map(str::trim),
            Some("0") | Some("false")
        )
    }
}

/// POST /api/sync/version/{version_id}
pub async fn sync_version(
    State(state): State<AppState>,
    Path(version_id): Path<i64>,
    Query(query): Query<SyncVersionQuery>,
) -> Result<Json<Version>, AppError> {
    let synchronizer = state.synchronizer.clone();
    let api_key = state.civitai_api_key.clone();
    let download = query.wants_download();
    let version = detached(async move {
        synchronizer
            .sync_version(version_id, query.model_id, download, api_key.as_deref())
            .await
    })
    .await?
    .map_err(|e| ingest_error(e, version_id))?;
    Ok(Json(version))
}

/// `POST /api/versions/{id}/refresh` のクエリ
#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    /// `metadata,description,images` のカンマ区切り。省略時は `all`
    pub fields: Option<String>,
}

/// POST /api/versions/{id}/refresh
///
/// 取り込み済みバージョンをリモートの現在の内容で更新する。
pub async fn refresh_version(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<Version>, AppError> {
    let fields = RefreshFields::parse(query.fields.as_deref().unwrap_or("all"));
    let synchronizer = state.synchronizer.clone();
    let api_key = state.civitai_api_key.clone();
    let version = detached(async move {
        synchronizer
            .refresh_version(id, fields, api_key.as_deref())
            .await
    })
    .await?
    .map_err(|e| ingest_error(e, id))?;
    info!(version_id = id, ?fields, "Version refreshed");
    Ok(Json(version))
}

fn remote_error(err: RemoteError, what: &str) -> MmError {
    if err.is_not_found() {
        MmError::NotFound(what.to_string())
    } else {
        MmError::Http(err.to_string())
    }
}

fn ingest_error(err: IngestError, version_id: i64) -> MmError {
    match err {
        IngestError::AlreadyExists(_) => MmError::Conflict("Model version already exists".into()),
        IngestError::Cancelled => MmError::Conflict("Download cancelled".into()),
        IngestError::Missing(id) => MmError::VersionNotFound(id),
        IngestError::Remote(e) if e.is_not_found() => MmError::VersionNotFound(version_id),
        IngestError::Remote(e) => MmError::Http(e.to_string()),
        IngestError::Catalog(e) => e,
        other => {
            warn!(version_id, error = %other, "Version sync failed");
            MmError::Internal(other.to_string())
        }
    }
}
