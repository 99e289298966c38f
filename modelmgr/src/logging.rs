//! ロギング初期化
//!
//! 標準出力へのfmtレイヤーと、`MODELMGR_LOG_DIR` 指定時の日次ローテーションJSONファイル。

use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::get_env_with_fallback_or;

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

const LOG_FILE_PREFIX: &str = "modelmgr.log";

/// ログ設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// フィルター（`info`、`modelmgr=debug,tower_http=info` など）
    pub level: String,
    /// ファイル出力先
    pub dir: Option<PathBuf>,
}

impl LogConfig {
    /// 環境変数から読み込む
    pub fn from_env() -> Self {
        Self {
            level: get_env_with_fallback_or("MODELMGR_LOG_LEVEL", "LOG_LEVEL", "info"),
            dir: std::env::var("MODELMGR_LOG_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// 環境変数の設定でロギングを初期化する
pub fn init() -> anyhow::Result<()> {
    init_with(&LogConfig::from_env())
}

/// 指定の設定でロギングを初期化する
///
/// 二度目以降の呼び出しは何もしない。
pub fn init_with(config: &LogConfig) -> anyhow::Result<()> {
    let stdout_layer = fmt::layer().with_target(true).with_filter(config.filter());

    let file_layer = match config.dir.as_ref() {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(config.filter()),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init();
    Ok(())
}
