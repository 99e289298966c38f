//! Configuration management via environment variables
//!
//! `MODELMGR_*` が正式名。旧名（`PORT`, `CLIENT_SECRET` など）も読むが、
//! その場合は deprecation warning を出す。

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get an environment variable with fallback to a deprecated name
///
/// # Returns
/// * `Some(value)` - The environment variable value
/// * `None` - Neither variable is set
///
/// # Example
/// ```
/// use modelmgr::config::get_env_with_fallback;
///
/// let secret = get_env_with_fallback("MODELMGR_CLIENT_SECRET", "CLIENT_SECRET");
/// ```
pub fn get_env_with_fallback(new_name: &str, old_name: &str) -> Option<String> {
    if let Ok(val) = std::env::var(new_name) {
        return Some(val);
    }
    if let Ok(val) = std::env::var(old_name) {
        tracing::warn!(
            "Environment variable '{}' is deprecated, use '{}' instead",
            old_name,
            new_name
        );
        return Some(val);
    }
    None
}

/// Get an environment variable with fallback and default value
pub fn get_env_with_fallback_or(new_name: &str, old_name: &str, default: &str) -> String {
    get_env_with_fallback(new_name, old_name).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable with fallback, parsing to a specific type
///
/// Falls back to `default` when neither is set or parsing fails.
pub fn get_env_with_fallback_parse<T: std::str::FromStr>(
    new_name: &str,
    old_name: &str,
    default: T,
) -> T {
    get_env_with_fallback(new_name, old_name)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// 空白だけの値を未設定として扱う
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// モデルファイルの既定ルート
pub const DEFAULT_MODEL_PATH: &str = "./data/downloads";
/// プレビュー画像の既定ルート
pub const DEFAULT_IMAGE_PATH: &str = "./data/images";
/// リモートカタログの既定URL
pub const DEFAULT_CIVITAI_BASE_URL: &str = "https://civitai.com";
/// 同期ワーカー数の既定値
pub const DEFAULT_SYNC_CONCURRENCY: usize = 4;

/// アプリケーション設定
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// SQLite URL
    pub database_url: String,
    /// クライアント接続の共有シークレット（未設定なら接続をすべて拒否）
    pub client_secret: Option<String>,
    /// リモートカタログのBearerトークン
    pub civitai_api_key: Option<String>,
    /// リモートカタログのベースURL
    pub civitai_base_url: String,
    /// モデルルート（settings の `model_path` が優先）
    pub model_path: PathBuf,
    /// 画像ルート（settings の `image_path` が優先）
    pub image_path: PathBuf,
    /// ゴミ箱ルート（未設定なら `$XDG_DATA_HOME/Trash`）
    pub trash_dir: Option<PathBuf>,
    /// チャンク間の無通信タイムアウト（None で無効）
    pub download_stall_timeout: Option<Duration>,
    /// 同期ワーカー数の上限
    pub sync_concurrency: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:modelmgr.db".to_string(),
            client_secret: None,
            civitai_api_key: None,
            civitai_base_url: DEFAULT_CIVITAI_BASE_URL.to_string(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            image_path: PathBuf::from(DEFAULT_IMAGE_PATH),
            trash_dir: None,
            download_stall_timeout: None,
            sync_concurrency: DEFAULT_SYNC_CONCURRENCY,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let stall_secs = get_env_with_fallback_parse(
            "MODELMGR_DOWNLOAD_STALL_TIMEOUT_SECS",
            "DOWNLOAD_STALL_TIMEOUT_SECS",
            0u64,
        );
        let sync_concurrency = get_env_with_fallback_parse(
            "MODELMGR_SYNC_CONCURRENCY",
            "SYNC_CONCURRENCY",
            DEFAULT_SYNC_CONCURRENCY,
        )
        .max(1);

        Self {
            database_url: get_env_with_fallback_or(
                "MODELMGR_DATABASE_URL",
                "DATABASE_URL",
                &defaults.database_url,
            ),
            client_secret: non_empty(get_env_with_fallback(
                "MODELMGR_CLIENT_SECRET",
                "CLIENT_SECRET",
            )),
            civitai_api_key: non_empty(get_env_with_fallback(
                "MODELMGR_CIVITAI_API_KEY",
                "CIVITAI_API_KEY",
            )),
            civitai_base_url: non_empty(std::env::var("MODELMGR_CIVITAI_BASE_URL").ok())
                .unwrap_or(defaults.civitai_base_url),
            model_path: non_empty(std::env::var("MODELMGR_MODEL_PATH").ok())
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            image_path: non_empty(std::env::var("MODELMGR_IMAGE_PATH").ok())
                .map(PathBuf::from)
                .unwrap_or(defaults.image_path),
            trash_dir: non_empty(std::env::var("MODELMGR_TRASH_DIR").ok()).map(PathBuf::from),
            download_stall_timeout: (stall_secs > 0).then(|| Duration::from_secs(stall_secs)),
            sync_concurrency,
        }
    }
}

/// 実行時に確定したファイル配置
///
/// どちらも絶対パスに正規化済み。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    /// モデルルート（`/downloads` で配信）
    pub model_root: PathBuf,
    /// 画像ルート（`/images` で配信）
    pub image_root: PathBuf,
}

impl StoragePaths {
    /// 2つのルートを絶対パス化して保持する
    pub fn new(model_root: impl AsRef<Path>, image_root: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            model_root: std::path::absolute(model_root)?,
            image_root: std::path::absolute(image_root)?,
        })
    }

    /// モデルルートからの相対パス（`/` 区切り）
    pub fn relative_to_models(&self, path: &Path) -> String {
        relative_slash_path(path, &self.model_root)
    }

    /// 画像ルートからの相対パス（`/` 区切り）
    pub fn relative_to_images(&self, path: &Path) -> String {
        relative_slash_path(path, &self.image_root)
    }
}

/// `root` 配下なら相対パスを、そうでなければ元のパスを返す
fn relative_slash_path(path: &Path, root: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match absolute.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}
