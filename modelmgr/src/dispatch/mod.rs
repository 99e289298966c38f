//! ディスパッチプロトコル
//!
//! カタログのバージョンをクライアントが実行できるコマンドに変換し、
//! (client, version) ごとの状態を更新してから接続へ送る。
//! クライアントからの完了通知もここで状態に反映する。
//!
//! ```text
//! NONE --dispatch(download)--> PENDING --ack(complete)--> INSTALLED
//! PENDING --dispatch(delete)--> NONE
//! INSTALLED --dispatch(delete) or ack(deleted)--> NONE
//! ```
//!
//! 送信に失敗しても状態の書き込みは戻さない。

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::common::error::MmError;
use crate::common::protocol::{ClientAck, ClientFrame, DispatchAction, DispatchCommand, DispatchRequest};
use crate::db::traits::{CatalogRepository, ClientFileRepository};
use crate::registry::ClientRegistry;
use crate::sync::FALLBACK_TYPE_DIR;
use crate::types::ClientFileStatus;

/// 静的配信のURLプレフィックス
pub const DOWNLOADS_URL_PREFIX: &str = "/downloads/";

/// ディスパッチのエラー
#[derive(Debug, Error)]
pub enum DispatchError {
    /// リクエスト不正
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// バージョンが存在しない
    #[error("model version {0} not found")]
    VersionNotFound(i64),

    /// バージョンにローカルファイルが無い
    #[error("model version {0} has no local file")]
    NoLocalFile(i64),

    /// クライアントが接続していない（状態は書き込み済み）
    #[error("client {0} not connected")]
    ClientNotConnected(String),

    /// ストア/エンコードの失敗
    #[error(transparent)]
    Store(MmError),
}

impl From<MmError> for DispatchError {
    fn from(err: MmError) -> Self {
        match err {
            MmError::ClientNotConnected(id) => Self::ClientNotConnected(id),
            other => Self::Store(other),
        }
    }
}

impl From<DispatchError> for MmError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidRequest(msg) => MmError::validation(msg),
            DispatchError::VersionNotFound(id) => MmError::VersionNotFound(id),
            DispatchError::NoLocalFile(id) => MmError::NoLocalFile(id),
            DispatchError::ClientNotConnected(id) => MmError::ClientNotConnected(id),
            DispatchError::Store(inner) => inner,
        }
    }
}

/// ディスパッチサービス
#[derive(Clone)]
pub struct DispatchService {
    catalog: Arc<dyn CatalogRepository>,
    client_files: Arc<dyn ClientFileRepository>,
    registry: ClientRegistry,
}

impl DispatchService {
    /// サービスを作成
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        client_files: Arc<dyn ClientFileRepository>,
        registry: ClientRegistry,
    ) -> Self {
        Self {
            catalog,
            client_files,
            registry,
        }
    }

    /// 送信先の登録簿
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// コマンドを組み立てる（状態は変えない）
    pub async fn resolve_command(
        &self,
        request: &DispatchRequest,
    ) -> Result<DispatchCommand, DispatchError> {
        let client_id = request.client_id.trim();
        if client_id.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "client_id is required".to_string(),
            ));
        }
        let version_id = i64::try_from(request.model_version_id)
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                DispatchError::InvalidRequest("model_version_id is required".to_string())
            })?;

        let version = self
            .catalog
            .get_version(version_id)
            .await?
            .ok_or(DispatchError::VersionNotFound(version_id))?;

        let basename = Path::new(&version.file_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !version.file_path.trim().is_empty() && !name.is_empty())
            .ok_or(DispatchError::NoLocalFile(version_id))?;

        let subdirectory = match stored_subdirectory(&version.file_path) {
            Some(dir) => dir.to_string(),
            None => {
                let model_type = self
                    .catalog
                    .get_model(version.model_id)
                    .await?
                    .map(|m| m.model_type)
                    .unwrap_or_default();
                let dir = [model_type.as_str(), version.version_type.as_str()]
                    .into_iter()
                    .find(|t| !t.is_empty())
                    .unwrap_or(FALLBACK_TYPE_DIR)
                    .to_string();
                dir
            }
        };
        let relative = format!("{}/{}", subdirectory, basename);

        let command = match request.action {
            DispatchAction::Download => DispatchCommand {
                action: DispatchAction::Download,
                url: format!("{}{}", DOWNLOADS_URL_PREFIX, relative),
                filename: basename,
                subdirectory,
                model_version_id: request.model_version_id,
                client_id: client_id.to_string(),
            },
            DispatchAction::Delete => DispatchCommand {
                action: DispatchAction::Delete,
                url: String::new(),
                filename: relative,
                subdirectory: String::new(),
                model_version_id: request.model_version_id,
                client_id: client_id.to_string(),
            },
        };
        Ok(command)
    }

    /// ディスパッチを実行する
    ///
    /// 状態を書き込んでから送信する。送信失敗時も状態は残る。
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchCommand, DispatchError> {
        let command = self.resolve_command(request).await?;
        let version_id = command.model_version_id as i64;

        match command.action {
            DispatchAction::Download => {
                self.client_files
                    .upsert_status(&command.client_id, version_id, ClientFileStatus::Pending)
                    .await?;
            }
            DispatchAction::Delete => {
                self.client_files
                    .delete_status(&command.client_id, version_id)
                    .await?;
            }
        }

        if let Err(e) = self.registry.send(&command.client_id, &command).await {
            warn!(
                client_id = %command.client_id,
                model_version_id = version_id,
                action = command.action.as_str(),
                error = %e,
                "Dispatch not delivered"
            );
            return Err(e.into());
        }

        info!(
            client_id = %command.client_id,
            model_version_id = version_id,
            action = command.action.as_str(),
            "Dispatched command to client"
        );
        Ok(command)
    }

    /// クライアントからの生フレームを処理する
    ///
    /// 不正なフレームはログに残して無視する。接続は維持する。
    pub async fn handle_client_frame(&self, client_id: &str, raw: &str) {
        let frame: ClientFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(client_id, error = %e, "Ignoring malformed client frame");
                return;
            }
        };

        let kind = frame.kind.clone();
        let Some(ack) = frame.into_ack() else {
            debug!(client_id, kind = %kind, "Ignoring client frame without state change");
            return;
        };

        if let Err(e) = self.apply_ack(client_id, ack).await {
            warn!(client_id, error = %e, "Failed to apply client acknowledgement");
        }
    }

    /// 完了通知を状態に反映する
    pub async fn apply_ack(&self, client_id: &str, ack: ClientAck) -> Result<(), MmError> {
        match ack {
            ClientAck::Complete(id) => {
                let id = to_row_id(id)?;
                self.client_files
                    .upsert_status(client_id, id, ClientFileStatus::Installed)
                    .await?;
                info!(client_id, model_version_id = id, "Client installed model");
            }
            ClientAck::Deleted(id) => {
                let id = to_row_id(id)?;
                self.client_files.delete_status(client_id, id).await?;
                info!(client_id, model_version_id = id, "Client deleted model");
            }
        }
        Ok(())
    }
}

fn to_row_id(id: u64) -> Result<i64, MmError> {
    i64::try_from(id).map_err(|_| MmError::validation(format!("model_version_id out of range: {}", id)))
}

/// 保存済み相対パスのディレクトリ部分
///
/// 種別が後から補完されても、ファイルが実際に置かれた場所を指す。
/// 絶対パスやモデルルートの外を指すものは使わない。
fn stored_subdirectory(file_path: &str) -> Option<&str> {
    let file_path = file_path.trim();
    if Path::new(file_path).is_absolute() {
        return None;
    }
    let (dir, _) = file_path.trim_start_matches("./").rsplit_once('/')?;
    let inside_root = !dir.is_empty() && dir.split('/').all(|part| !part.is_empty() && part != "..");
    inside_root.then_some(dir)
}
