//! リモートカタログ（CivitAI互換API）クライアント
//!
//! モデル一覧、モデル詳細、バージョン詳細を取得する。
//! 認証はBearerトークン（任意）。

pub mod types;

pub use types::{Creator, FileHashes, RemoteFile, RemoteImage, RemoteModel, RemoteVersion};

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use types::ModelListResponse;

/// リモートカタログ取得のエラー
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTPリクエスト失敗
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// 2xx以外のレスポンス
    #[error("remote catalog returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// バージョンがどこにも見つからない
    #[error("model version {0} not found")]
    VersionNotFound(i64),
}

impl RemoteError {
    /// 404相当か
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::VersionNotFound(_))
            || matches!(self, Self::Status { status: 404, .. })
    }
}

/// リモートカタログの抽象
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// モデル一覧（最大100件）
    async fn fetch_models(&self, api_key: Option<&str>) -> Result<Vec<RemoteModel>, RemoteError>;
    /// モデル詳細
    async fn fetch_model(&self, model_id: i64, api_key: Option<&str>)
        -> Result<RemoteModel, RemoteError>;
    /// バージョン詳細
    async fn fetch_version(
        &self,
        version_id: i64,
        api_key: Option<&str>,
    ) -> Result<RemoteVersion, RemoteError>;
}

/// HTTP実装
#[derive(Clone)]
pub struct CivitaiClient {
    client: Client,
    base_url: String,
}

impl CivitaiClient {
    /// クライアントを作成
    ///
    /// # Arguments
    /// * `client` - 共有HTTPクライアント
    /// * `base_url` - 例: `https://civitai.com`
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        api_key: Option<&str>,
    ) -> Result<T, RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching from remote catalog");

        let mut request = self.client.get(&url);
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RemoteCatalog for CivitaiClient {
    async fn fetch_models(&self, api_key: Option<&str>) -> Result<Vec<RemoteModel>, RemoteError> {
        let list: ModelListResponse = self.get_json("/api/v1/models?limit=100", api_key).await?;
        Ok(list.into_items())
    }

    async fn fetch_model(
        &self,
        model_id: i64,
        api_key: Option<&str>,
    ) -> Result<RemoteModel, RemoteError> {
        self.get_json(&format!("/api/v1/models/{}", model_id), api_key)
            .await
    }

    async fn fetch_version(
        &self,
        version_id: i64,
        api_key: Option<&str>,
    ) -> Result<RemoteVersion, RemoteError> {
        self.get_json(&format!("/api/v1/model-versions/{}", version_id), api_key)
            .await
    }
}

/// バージョン詳細を取得する。直接取得に失敗したらモデル詳細から探す
///
/// # Arguments
/// * `fallback_model_id` - 直接取得できなかったときに探すモデル
///
/// # Returns
/// * `Err(RemoteError::VersionNotFound)` - どちらでも見つからない
pub async fn fetch_version_details(
    remote: &dyn RemoteCatalog,
    version_id: i64,
    fallback_model_id: Option<i64>,
    api_key: Option<&str>,
) -> Result<RemoteVersion, RemoteError> {
    let direct_err = match remote.fetch_version(version_id, api_key).await {
        Ok(version) => return Ok(version),
        Err(e) => e,
    };

    let Some(model_id) = fallback_model_id else {
        return Err(if direct_err.is_not_found() {
            RemoteError::VersionNotFound(version_id)
        } else {
            direct_err
        });
    };

    warn!(
        version_id,
        model_id,
        error = %direct_err,
        "Version lookup failed, searching model summary"
    );
    let model = remote.fetch_model(model_id, api_key).await?;
    model
        .model_versions
        .into_iter()
        .find(|v| v.id == version_id)
        .map(|mut v| {
            v.model_id.get_or_insert(model_id);
            v
        })
        .ok_or(RemoteError::VersionNotFound(version_id))
}
