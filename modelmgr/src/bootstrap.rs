//! サーバー初期化ロジック
//!
//! データベース接続、設定テーブルの上書き解決、各コンポーネントの組み立てを担当する。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::civitai::CivitaiClient;
use crate::common::error::{MmError, MmResult};
use crate::config::{AppConfig, StoragePaths};
use crate::db::settings::{
    SettingsStorage, CIVITAI_API_KEY_KEY, IMAGE_PATH_KEY, MODEL_PATH_KEY,
};
use crate::db::traits::{CatalogRepository, ClientFileRepository};
use crate::dispatch::DispatchService;
use crate::download::DownloadCoordinator;
use crate::registry::ClientRegistry;
use crate::sync::{SyncSettings, Synchronizer};
use crate::trash::TrashBin;
use crate::AppState;

/// サーバー初期化を実行する
///
/// DB接続とマイグレーションの後、`build_app_state` で状態を組み立てる。
pub async fn initialize(config: AppConfig) -> MmResult<AppState> {
    info!("Model manager v{}", env!("CARGO_PKG_VERSION"));

    let db_pool = crate::db::migrations::initialize_database(&config.database_url).await?;
    info!(database_url = %config.database_url, "Database ready");

    build_app_state(db_pool, config).await
}

/// 接続済みのプールから `AppState` を組み立てる
///
/// 保存先とAPIキーは設定テーブルの値が環境変数より優先される。
pub async fn build_app_state(db_pool: sqlx::SqlitePool, config: AppConfig) -> MmResult<AppState> {
    let settings = SettingsStorage::new(db_pool.clone());

    let model_path = settings
        .get_non_empty(MODEL_PATH_KEY)
        .await?
        .map(PathBuf::from)
        .unwrap_or_else(|| config.model_path.clone());
    let image_path = settings
        .get_non_empty(IMAGE_PATH_KEY)
        .await?
        .map(PathBuf::from)
        .unwrap_or_else(|| config.image_path.clone());
    let civitai_api_key = settings
        .get_non_empty(CIVITAI_API_KEY_KEY)
        .await?
        .or_else(|| config.civitai_api_key.clone());

    for dir in [&model_path, &image_path] {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            MmError::Io(format!("Failed to create directory {}: {}", dir.display(), e))
        })?;
    }
    let paths = StoragePaths::new(&model_path, &image_path)
        .map_err(|e| MmError::Io(format!("Failed to resolve storage paths: {}", e)))?;
    info!(
        model_root = %paths.model_root.display(),
        image_root = %paths.image_root.display(),
        "Storage initialized"
    );

    // HTTPクライアント（接続プーリング有効）を作成
    let http_client = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .tcp_keepalive(Duration::from_secs(30))
        .build()
        .map_err(|e| MmError::Internal(format!("Failed to create HTTP client: {}", e)))?;

    let downloads = DownloadCoordinator::new(
        http_client.clone(),
        paths.model_root.clone(),
        config.download_stall_timeout,
    );

    let trash = resolve_trash(&config, &paths);

    let catalog: Arc<dyn CatalogRepository> = Arc::new(db_pool.clone());
    let client_files: Arc<dyn ClientFileRepository> = Arc::new(db_pool.clone());

    let synchronizer = Synchronizer::new(
        catalog.clone(),
        Arc::new(CivitaiClient::new(http_client, &config.civitai_base_url)),
        downloads.clone(),
        trash,
        SyncSettings {
            paths: paths.clone(),
            concurrency: config.sync_concurrency,
            site_url: config.civitai_base_url.clone(),
        },
    );

    let registry = ClientRegistry::new();
    let dispatch = DispatchService::new(catalog, client_files.clone(), registry.clone());

    if config.client_secret.as_deref().map_or(true, str::is_empty) {
        warn!("Client secret is not configured; all client connections will be rejected");
    }

    Ok(AppState {
        db_pool,
        config: Arc::new(config),
        paths,
        civitai_api_key,
        downloads,
        registry,
        dispatch,
        synchronizer,
        client_files,
    })
}

fn resolve_trash(config: &AppConfig, paths: &StoragePaths) -> TrashBin {
    if let Some(dir) = config.trash_dir.as_ref() {
        return TrashBin::new(dir.clone());
    }
    match TrashBin::user_default() {
        Ok(trash) => trash,
        Err(e) => {
            let fallback = paths.model_root.join(".Trash");
            warn!(
                fallback = %fallback.display(),
                "User trash unavailable ({}), using fallback",
                e
            );
            TrashBin::new(fallback)
        }
    }
}
