//! カタログ同期モジュール
//!
//! リモートカタログのモデル群を固定数のワーカーで取り込む。
//!
//! # 処理フロー（1モデルあたり）
//! 1. 親モデルを検索、無ければ作成（種別が空なら補完）
//! 2. 宣言された各バージョンについて、既知（論理削除済み含む）ならスキップ
//! 3. バージョン詳細を取得し、優先ファイルをモデルルートへダウンロード
//! 4. 110バイト未満のファイルはゴミ箱へ移して記録しない
//! 5. バージョンを登録し、プレビュー画像を画像ルートへ保存
//!
//! 取り込み済みバージョンは `refresh_version` でメタデータ・説明文・
//! 画像をリモートの現在の内容に合わせられる。

pub mod file_select;
pub mod media;

pub use file_select::{is_video_url, reserve_filename, select_model_file};

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::civitai::{fetch_version_details, RemoteCatalog, RemoteError, RemoteImage, RemoteModel, RemoteVersion};
use crate::common::error::{MmError, MmResult};
use crate::config::StoragePaths;
use crate::db::traits::CatalogRepository;
use crate::download::{DownloadCoordinator, DownloadError};
use crate::trash::TrashBin;
use crate::types::{Model, NewModel, NewVersion, NewVersionImage, Version};

/// これ未満のダウンロードはエラーページ等とみなして破棄する
pub const MIN_VALID_DOWNLOAD_BYTES: u64 = 110;

/// 種別が決まらないときの配置先
pub const FALLBACK_TYPE_DIR: &str = "Other";

/// 同期結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// 処理したモデル数
    pub items: usize,
    /// 新規登録したバージョン数
    pub versions_created: usize,
    /// 既知のためスキップしたバージョン数
    pub versions_skipped: usize,
    /// 失敗（取得・ダウンロード・登録）の件数
    pub failures: usize,
    /// キャンセルで打ち切ったモデル数
    pub cancelled: usize,
}

impl SyncReport {
    fn absorb(&mut self, other: SyncReport) {
        self.items += other.items;
        self.versions_created += other.versions_created;
        self.versions_skipped += other.versions_skipped;
        self.failures += other.failures;
        self.cancelled += other.cancelled;
    }
}

/// 同時実行ワーカー数の計測値
#[derive(Debug, Default)]
pub struct WorkerGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl WorkerGauge {
    /// 実行中のワーカー数
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// これまでの最大同時実行数
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> WorkerGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        WorkerGuard {
            gauge: Arc::clone(self),
        }
    }
}

struct WorkerGuard {
    gauge: Arc<WorkerGauge>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 1バージョンの取り込みエラー
#[derive(Debug, Error)]
pub enum IngestError {
    /// ダウンロードがキャンセルされた
    #[error("download cancelled")]
    Cancelled,

    /// 既に登録済み
    #[error("model version {0} already exists")]
    AlreadyExists(i64),

    /// カタログに無いバージョン
    #[error("model version {0} not found in catalog")]
    Missing(i64),

    /// リモートカタログ取得失敗
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// ダウンロード失敗
    #[error("download failed: {0}")]
    Download(DownloadError),

    /// 整合性チェックで破棄した
    #[error("downloaded file too small ({bytes} bytes)")]
    TooSmall {
        /// 受信バイト数
        bytes: u64,
    },

    /// カタログ書き込み失敗
    #[error(transparent)]
    Catalog(#[from] MmError),
}

impl From<DownloadError> for IngestError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Cancelled => Self::Cancelled,
            other => Self::Download(other),
        }
    }
}

/// `refresh_version` で更新する項目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshFields {
    /// 名前・種別・タグ・ファイル情報など
    pub metadata: bool,
    /// 説明文
    pub description: bool,
    /// プレビュー画像
    pub images: bool,
}

impl RefreshFields {
    /// すべて更新
    pub const ALL: Self = Self {
        metadata: true,
        description: true,
        images: true,
    };

    /// `metadata,description,images` のカンマ区切りを解釈する
    ///
    /// 空文字列と `all` はすべて。知らない項目は無視する。
    pub fn parse(fields: &str) -> Self {
        let fields = fields.trim().to_lowercase();
        if fields.is_empty() || fields == "all" {
            return Self::ALL;
        }
        let mut parsed = Self {
            metadata: false,
            description: false,
            images: false,
        };
        for field in fields.split(',') {
            match field.trim() {
                "metadata" => parsed.metadata = true,
                "description" => parsed.description = true,
                "images" => parsed.images = true,
                _ => {}
            }
        }
        parsed
    }
}

/// 同期の固定パラメータ
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// モデル/画像ルート
    pub paths: StoragePaths,
    /// ワーカー数の上限
    pub concurrency: usize,
    /// モデルページURLの組み立てに使うサイトURL
    pub site_url: String,
}

struct SyncInner {
    catalog: Arc<dyn CatalogRepository>,
    remote: Arc<dyn RemoteCatalog>,
    downloads: DownloadCoordinator,
    trash: TrashBin,
    settings: SyncSettings,
    gauge: Arc<WorkerGauge>,
}

/// カタログ同期
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<SyncInner>,
}

impl Synchronizer {
    /// 同期器を作成
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        remote: Arc<dyn RemoteCatalog>,
        downloads: DownloadCoordinator,
        trash: TrashBin,
        settings: SyncSettings,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                catalog,
                remote,
                downloads,
                trash,
                settings,
                gauge: Arc::new(WorkerGauge::default()),
            }),
        }
    }

    /// ワーカー数の計測値
    pub fn gauge(&self) -> &WorkerGauge {
        &self.inner.gauge
    }

    /// リモートの一覧を取得して全件同期する
    pub async fn sync_all(&self, api_key: Option<&str>) -> Result<SyncReport, RemoteError> {
        let items = self.inner.remote.fetch_models(api_key).await?;
        info!(count = items.len(), "Fetched model list from remote catalog");
        Ok(self.sync_batch(items, api_key).await)
    }

    /// 1モデルを同期する
    pub async fn sync_model(
        &self,
        model_id: i64,
        api_key: Option<&str>,
    ) -> Result<SyncReport, RemoteError> {
        let item = self.inner.remote.fetch_model(model_id, api_key).await?;
        Ok(self.sync_batch(vec![item], api_key).await)
    }

    /// モデル群を並行に取り込み、すべて終わるまで待つ
    ///
    /// 同時実行はワーカー上限を超えない。1モデルの失敗は他に影響しない。
    pub async fn sync_batch(&self, items: Vec<RemoteModel>, api_key: Option<&str>) -> SyncReport {
        let semaphore = Arc::new(Semaphore::new(self.inner.settings.concurrency.max(1)));
        let mut workers = JoinSet::new();
        let mut report = SyncReport::default();

        for item in items {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let this = self.clone();
            let api_key = api_key.map(str::to_string);
            workers.spawn(async move {
                let _permit = permit;
                let _running = this.inner.gauge.enter();
                this.process_item(item, api_key.as_deref()).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(item_report) => report.absorb(item_report),
                Err(e) => {
                    error!(error = %e, "Sync worker panicked");
                    report.items += 1;
                    report.failures += 1;
                }
            }
        }

        info!(
            items = report.items,
            created = report.versions_created,
            skipped = report.versions_skipped,
            failures = report.failures,
            cancelled = report.cancelled,
            "Sync batch finished"
        );
        report
    }

    /// 1バージョンを取り込む
    ///
    /// # Arguments
    /// * `fallback_model_id` - バージョン詳細を直接取れないときに探すモデル
    /// * `download` - false ならファイルを取得せず記録だけ作る
    pub async fn sync_version(
        &self,
        version_id: i64,
        fallback_model_id: Option<i64>,
        download: bool,
        api_key: Option<&str>,
    ) -> Result<Version, IngestError> {
        if self.inner.catalog.version_exists(version_id).await? {
            return Err(IngestError::AlreadyExists(version_id));
        }

        let detail = fetch_version_details(
            self.inner.remote.as_ref(),
            version_id,
            fallback_model_id,
            api_key,
        )
        .await?;
        let model_id = detail
            .model_id
            .or(fallback_model_id)
            .ok_or(RemoteError::VersionNotFound(version_id))?;

        let item = self.inner.remote.fetch_model(model_id, api_key).await?;
        let model = self.resolve_model(&item).await?;
        self.ingest_version(&model, &item, detail, download, api_key)
            .await
    }

    /// 取り込み済みバージョンをリモートの現在の内容で更新する
    ///
    /// 画像を更新するときは古い画像をゴミ箱へ移してから取り直す。
    /// モデルファイル本体は取り直さない。
    ///
    /// # Arguments
    /// * `id` - カタログ上のバージョンID
    pub async fn refresh_version(
        &self,
        id: i64,
        fields: RefreshFields,
        api_key: Option<&str>,
    ) -> Result<Version, IngestError> {
        let catalog = &self.inner.catalog;
        let mut version = catalog.get_version(id).await?.ok_or(IngestError::Missing(id))?;
        let mut model = catalog
            .get_model(version.model_id)
            .await?
            .ok_or(IngestError::Missing(id))?;

        let item = self.inner.remote.fetch_model(model.remote_id, api_key).await?;
        let detail = fetch_version_details(
            self.inner.remote.as_ref(),
            version.remote_version_id,
            Some(model.remote_id),
            api_key,
        )
        .await?;

        if fields.metadata {
            version.name = detail.name.clone();
            version.base_model = detail.base_model.clone();
            version.early_access_time_frame = detail.early_access_time_frame;
            if let Some(file) = select_model_file(&detail.files) {
                version.size_kb = file.size_kb;
                version.sha256 = file.hashes.sha256.clone().unwrap_or_default();
                version.download_url = file.download_url.clone();
            }
            version.trained_words = detail.trained_words.join(",");
            version.nsfw = item.nsfw;
            version.version_type = item.model_type.clone();
            version.tags = item.tags.join(",");
            version.mode = item.mode.clone().unwrap_or_default();
            version.model_url = self.model_url(item.id, detail.id);
            version.remote_created_at = detail.created_at.clone();
            version.remote_updated_at = detail.updated_at.clone();

            model.name = item.name.clone();
            if !item.model_type.is_empty() {
                model.model_type = item.model_type.clone();
            }
            model.tags = item.tags.join(",");
            model.nsfw = item.nsfw;
        }

        if fields.description {
            let description = item.description.clone().unwrap_or_default();
            model.description = description.clone();
            version.description = description;
        }

        if fields.images {
            let previous = version.image_path.clone();
            self.discard_images(&version).await?;

            let (image_path, width, height) = self
                .ingest_images(&version, &detail.images, &type_dir(&model, &item), api_key)
                .await
                .unwrap_or_default();
            if model.image_path.is_empty() || model.image_path == previous {
                model.image_path = image_path.clone();
                model.image_width = width;
                model.image_height = height;
            }
            version.image_path = image_path;
        }

        catalog.update_model(&model).await?;
        catalog.update_version(&version).await?;
        debug!(version_id = id, ?fields, "Version refreshed from remote catalog");

        Ok(catalog.get_version(id).await?.unwrap_or(version))
    }

    /// バージョンの画像ファイルをゴミ箱へ移し、画像行を削除する
    async fn discard_images(&self, version: &Version) -> MmResult<()> {
        let catalog = &self.inner.catalog;
        let mut paths = vec![version.image_path.clone()];
        paths.extend(
            catalog
                .list_version_images(version.id)
                .await?
                .into_iter()
                .map(|image| image.path),
        );
        paths.retain(|p| !p.is_empty());
        paths.sort();
        paths.dedup();

        for relative in paths {
            let path = self.inner.settings.paths.image_root.join(&relative);
            if let Err(e) = self.inner.trash.move_to_trash(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to move preview image to trash");
            }
        }
        catalog.delete_version_images(version.id).await?;
        Ok(())
    }

    fn model_url(&self, remote_model_id: i64, remote_version_id: i64) -> String {
        format!(
            "{}/models/{}?modelVersionId={}",
            self.inner.settings.site_url.trim_end_matches('/'),
            remote_model_id,
            remote_version_id
        )
    }

    async fn process_item(&self, item: RemoteModel, api_key: Option<&str>) -> SyncReport {
        let mut report = SyncReport {
            items: 1,
            ..Default::default()
        };

        let model = match self.resolve_model(&item).await {
            Ok(model) => model,
            Err(e) => {
                warn!(remote_id = item.id, error = %e, "Failed to resolve model");
                report.failures += 1;
                return report;
            }
        };

        for summary in &item.model_versions {
            match self.inner.catalog.version_exists(summary.id).await {
                Ok(true) => {
                    debug!(version_id = summary.id, "Version already known, skipping");
                    report.versions_skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(version_id = summary.id, error = %e, "Failed to check version");
                    report.failures += 1;
                    continue;
                }
            }

            let detail = match self.inner.remote.fetch_version(summary.id, api_key).await {
                Ok(detail) => detail,
                Err(e) => {
                    warn!(version_id = summary.id, error = %e, "Failed to fetch version detail");
                    report.failures += 1;
                    continue;
                }
            };

            match self
                .ingest_version(&model, &item, detail, true, api_key)
                .await
            {
                Ok(version) => {
                    info!(
                        model = %model.name,
                        version_id = version.remote_version_id,
                        file = %version.file_path,
                        "Version ingested"
                    );
                    report.versions_created += 1;
                }
                Err(IngestError::Cancelled) => {
                    info!(remote_id = item.id, "Sync cancelled for model");
                    report.cancelled += 1;
                    break;
                }
                Err(e) => {
                    warn!(version_id = summary.id, error = %e, "Failed to ingest version");
                    report.failures += 1;
                }
            }
        }

        report
    }

    async fn resolve_model(&self, item: &RemoteModel) -> MmResult<Model> {
        let catalog = &self.inner.catalog;
        if let Some(mut model) = catalog.find_model_by_remote_id(item.id).await? {
            if model.model_type.is_empty() && !item.model_type.is_empty() {
                catalog
                    .backfill_model_type(model.id, &item.model_type)
                    .await?;
                model.model_type = item.model_type.clone();
            }
            return Ok(model);
        }

        catalog
            .create_model(&NewModel {
                remote_id: item.id,
                name: item.name.clone(),
                model_type: item.model_type.clone(),
                creator_username: item
                    .creator
                    .as_ref()
                    .map(|c| c.username.clone())
                    .unwrap_or_default(),
                tags: item.tags.join(","),
                nsfw: item.nsfw,
                description: item.description.clone().unwrap_or_default(),
            })
            .await
    }

    async fn ingest_version(
        &self,
        model: &Model,
        item: &RemoteModel,
        detail: RemoteVersion,
        download: bool,
        api_key: Option<&str>,
    ) -> Result<Version, IngestError> {
        let settings = &self.inner.settings;
        let type_dir = type_dir(model, item);
        let model_dir = settings.paths.model_root.join(&type_dir);

        let selected = select_model_file(&detail.files);
        let mut file_path = String::new();

        if let Some(file) = selected.filter(|f| download && !f.download_url.is_empty()) {
            let filename = reserve_filename(
                &model_dir,
                &file_select::sanitize_filename(&file.name),
                detail.id,
            )
            .await
            .map_err(DownloadError::Io)?;
            let outcome = match self
                .inner
                .downloads
                .download(&file.download_url, &model_dir, &filename, api_key)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    // 確保した空ファイルを残さない
                    tokio::fs::remove_file(model_dir.join(&filename)).await.ok();
                    return Err(e.into());
                }
            };

            if outcome.bytes_written < MIN_VALID_DOWNLOAD_BYTES {
                warn!(
                    path = %outcome.path.display(),
                    bytes = outcome.bytes_written,
                    "Downloaded file is too small, moving to trash"
                );
                if let Err(e) = self.inner.trash.move_to_trash(&outcome.path).await {
                    warn!(error = %e, "Failed to move file to trash");
                }
                return Err(IngestError::TooSmall {
                    bytes: outcome.bytes_written,
                });
            }
            file_path = settings.paths.relative_to_models(&outcome.path);
        }

        let version = self
            .inner
            .catalog
            .create_version(&NewVersion {
                model_id: model.id,
                remote_version_id: detail.id,
                name: detail.name.clone(),
                base_model: detail.base_model.clone(),
                early_access_time_frame: detail.early_access_time_frame,
                size_kb: selected.map(|f| f.size_kb).unwrap_or_default(),
                trained_words: detail.trained_words.join(","),
                nsfw: item.nsfw,
                version_type: item.model_type.clone(),
                tags: item.tags.join(","),
                description: item.description.clone().unwrap_or_default(),
                mode: item.mode.clone().unwrap_or_default(),
                model_url: self.model_url(item.id, detail.id),
                remote_created_at: detail.created_at.clone(),
                remote_updated_at: detail.updated_at.clone(),
                sha256: selected
                    .and_then(|f| f.hashes.sha256.clone())
                    .unwrap_or_default(),
                download_url: selected.map(|f| f.download_url.clone()).unwrap_or_default(),
                file_path: file_path.clone(),
                image_path: String::new(),
            })
            .await?;

        if let Some((image_path, width, height)) = self
            .ingest_images(&version, &detail.images, &type_dir, api_key)
            .await
        {
            self.inner
                .catalog
                .set_version_image_path(version.id, &image_path)
                .await?;
            self.inner
                .catalog
                .set_model_image_if_empty(model.id, &image_path, width, height)
                .await?;
        }
        if !file_path.is_empty() {
            self.inner
                .catalog
                .set_model_file_if_empty(model.id, &file_path)
                .await?;
        }

        Ok(self
            .inner
            .catalog
            .get_version(version.id)
            .await?
            .unwrap_or(version))
    }

    /// プレビュー画像を保存し、最初に保存できた画像を返す
    ///
    /// 画像の失敗はバージョン登録を止めない。
    async fn ingest_images(
        &self,
        version: &Version,
        images: &[RemoteImage],
        type_dir: &str,
        api_key: Option<&str>,
    ) -> Option<(String, i64, i64)> {
        let paths = &self.inner.settings.paths;
        let image_dir = paths.image_root.join(type_dir);
        let mut first = None;

        for (idx, image) in images.iter().enumerate() {
            let Some(url) = image.source_url() else {
                continue;
            };
            if is_video_url(url) {
                debug!(url, "Skipping video preview");
                continue;
            }

            let filename = format!("{}_{}.jpg", version.remote_version_id, idx);
            let outcome = match self
                .inner
                .downloads
                .download(url, &image_dir, &filename, api_key)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(url, error = %e, "Failed to download preview image");
                    continue;
                }
            };

            let (width, height) = media::image_dimensions(&outcome.path)
                .await
                .unwrap_or((image.width, image.height));
            let hash = match media::file_sha256(&outcome.path).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(error = %e, "Failed to hash preview image");
                    String::new()
                }
            };
            let relative = paths.relative_to_images(&outcome.path);

            if let Err(e) = self
                .inner
                .catalog
                .create_version_image(&NewVersionImage {
                    version_id: version.id,
                    path: relative.clone(),
                    width,
                    height,
                    hash,
                    meta: image
                        .meta
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_default(),
                })
                .await
            {
                warn!(error = %e, "Failed to record preview image");
            }

            if first.is_none() {
                first = Some((relative, width, height));
            }
        }

        first
    }
}

/// 配置サブディレクトリ: モデル種別 → リモートの種別 → `Other`
fn type_dir(model: &Model, item: &RemoteModel) -> String {
    [model.model_type.as_str(), item.model_type.as_str()]
        .into_iter()
        .find(|t| !t.is_empty())
        .unwrap_or(FALLBACK_TYPE_DIR)
        .to_string()
}
