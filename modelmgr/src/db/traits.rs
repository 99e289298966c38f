//! Repository traitパターン定義
//!
//! DB操作を抽象化し、テスタビリティを向上させるためのtrait群。
//! 各traitは `catalog` / `client_files` のフリー関数に対応する。

use async_trait::async_trait;
use chrono::Duration;
use sqlx::SqlitePool;

use crate::common::error::MmResult;
use crate::types::{
    ClientFile, ClientFileStatus, Model, NewModel, NewVersion, NewVersionImage, Version,
    VersionImage,
};

// ---------------------------------------------------------------------------
// CatalogRepository
// ---------------------------------------------------------------------------

/// モデル/バージョン/画像のRepository trait
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// リモートIDでモデルを検索（論理削除済みも含む）
    async fn find_model_by_remote_id(&self, remote_id: i64) -> MmResult<Option<Model>>;
    /// IDでモデルを取得
    async fn get_model(&self, id: i64) -> MmResult<Option<Model>>;
    /// モデルを作成
    async fn create_model(&self, model: &NewModel) -> MmResult<Model>;
    /// 空の種別を補完
    async fn backfill_model_type(&self, id: i64, model_type: &str) -> MmResult<bool>;
    /// 代表画像が未設定なら設定
    async fn set_model_image_if_empty(
        &self,
        id: i64,
        image_path: &str,
        width: i64,
        height: i64,
    ) -> MmResult<bool>;
    /// 代表ファイルが未設定なら設定
    async fn set_model_file_if_empty(&self, id: i64, file_path: &str) -> MmResult<bool>;
    /// リモートバージョンIDが既知か（論理削除済みも含む）
    async fn version_exists(&self, remote_version_id: i64) -> MmResult<bool>;
    /// IDでバージョンを取得
    async fn get_version(&self, id: i64) -> MmResult<Option<Version>>;
    /// バージョンを作成
    async fn create_version(&self, version: &NewVersion) -> MmResult<Version>;
    /// バージョンのプレビュー画像パスを設定
    async fn set_version_image_path(&self, id: i64, image_path: &str) -> MmResult<()>;
    /// プレビュー画像を登録
    async fn create_version_image(&self, image: &NewVersionImage) -> MmResult<VersionImage>;
    /// バージョンのプレビュー画像一覧
    async fn list_version_images(&self, version_id: i64) -> MmResult<Vec<VersionImage>>;
    /// バージョンのプレビュー画像行を削除
    async fn delete_version_images(&self, version_id: i64) -> MmResult<u64>;
    /// モデルの可変項目を書き戻す
    async fn update_model(&self, model: &Model) -> MmResult<()>;
    /// バージョンのメタデータと画像パスを書き戻す
    async fn update_version(&self, version: &Version) -> MmResult<()>;
}

// ---------------------------------------------------------------------------
// ClientFileRepository
// ---------------------------------------------------------------------------

/// クライアント状態のRepository trait
#[async_trait]
pub trait ClientFileRepository: Send + Sync {
    /// 状態を書き込む
    async fn upsert_status(
        &self,
        client_id: &str,
        model_version_id: i64,
        status: ClientFileStatus,
    ) -> MmResult<()>;
    /// 状態行を削除
    async fn delete_status(&self, client_id: &str, model_version_id: i64) -> MmResult<bool>;
    /// 1件取得
    async fn get_status(
        &self,
        client_id: &str,
        model_version_id: i64,
    ) -> MmResult<Option<ClientFile>>;
    /// 完了通知待ちの行を一覧
    async fn list_pending(
        &self,
        client_id: Option<&str>,
        older_than: Option<Duration>,
    ) -> MmResult<Vec<ClientFile>>;
    /// すべての pending 行を削除
    async fn reset_all_pending(&self) -> MmResult<u64>;
    /// 指定クライアントの pending 行を削除
    async fn reset_pending_for_client(&self, client_id: &str) -> MmResult<u64>;
}

// ---------------------------------------------------------------------------
// SQLite implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl CatalogRepository for SqlitePool {
    async fn find_model_by_remote_id(&self, remote_id: i64) -> MmResult<Option<Model>> {
        super::catalog::find_model_by_remote_id(self, remote_id).await
    }

    async fn get_model(&self, id: i64) -> MmResult<Option<Model>> {
        super::catalog::get_model(self, id).await
    }

    async fn create_model(&self, model: &NewModel) -> MmResult<Model> {
        super::catalog::create_model(self, model).await
    }

    async fn backfill_model_type(&self, id: i64, model_type: &str) -> MmResult<bool> {
        super::catalog::backfill_model_type(self, id, model_type).await
    }

    async fn set_model_image_if_empty(
        &self,
        id: i64,
        image_path: &str,
        width: i64,
        height: i64,
    ) -> MmResult<bool> {
        super::catalog::set_model_image_if_empty(self, id, image_path, width, height).await
    }

    async fn set_model_file_if_empty(&self, id: i64, file_path: &str) -> MmResult<bool> {
        super::catalog::set_model_file_if_empty(self, id, file_path).await
    }

    async fn version_exists(&self, remote_version_id: i64) -> MmResult<bool> {
        super::catalog::version_exists(self, remote_version_id).await
    }

    async fn get_version(&self, id: i64) -> MmResult<Option<Version>> {
        super::catalog::get_version(self, id).await
    }

    async fn create_version(&self, version: &NewVersion) -> MmResult<Version> {
        super::catalog::create_version(self, version).await
    }

    async fn set_version_image_path(&self, id: i64, image_path: &str) -> MmResult<()> {
        super::catalog::set_version_image_path(self, id, image_path).await
    }

    async fn create_version_image(&self, image: &NewVersionImage) -> MmResult<VersionImage> {
        super::catalog::create_version_image(self, image).await
    }

    async fn list_version_images(&self, version_id: i64) -> MmResult<Vec<VersionImage>> {
        super::catalog::list_version_images(self, version_id).await
    }

    async fn delete_version_images(&self, version_id: i64) -> MmResult<u64> {
        super::catalog::delete_version_images(self, version_id).await
    }

    async fn update_model(&self, model: &Model) -> MmResult<()> {
        super::catalog::update_model(self, model).await
    }

    async fn update_version(&self, version: &Version) -> MmResult<()> {
        super::catalog::update_version(self, version).await
    }
}

#[async_trait]
impl ClientFileRepository for SqlitePool {
    async fn upsert_status(
        &self,
        client_id: &str,
        model_version_id: i64,
        status: ClientFileStatus,
    ) -> MmResult<()> {
        super::client_files::upsert_status(self, client_id, model_version_id, status).await
    }

    async fn delete_status(&self, client_id: &str, model_version_id: i64) -> MmResult<bool> {
        super::client_files::delete_status(self, client_id, model_version_id).await
    }

    async fn get_status(
        &self,
        client_id: &str,
        model_version_id: i64,
    ) -> MmResult<Option<ClientFile>> {
        super::client_files::get_status(self, client_id, model_version_id).await
    }

    async fn list_pending(
        &self,
        client_id: Option<&str>,
        older_than: Option<Duration>,
    ) -> MmResult<Vec<ClientFile>> {
        super::client_files::list_pending(self, client_id, older_than).await
    }

    async fn reset_all_pending(&self) -> MmResult<u64> {
        super::client_files::reset_all_pending(self).await
    }

    async fn reset_pending_for_client(&self, client_id: &str) -> MmResult<u64> {
        super::client_files::reset_pending_for_client(self, client_id).await
    }
}
