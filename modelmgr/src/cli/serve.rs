//! serve サブコマンド
//!
//! サーバーを起動します。

use clap::Args;

use crate::config::{get_env_with_fallback_or, get_env_with_fallback_parse, AppConfig};

/// 既定の待ち受けポート
pub const DEFAULT_PORT: u16 = 8080;

/// serve サブコマンドの引数
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Listen port (falls back to MODELMGR_PORT / PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind address (falls back to MODELMGR_HOST)
    #[arg(short = 'H', long)]
    pub host: Option<String>,
}

impl ServeArgs {
    /// 待ち受けアドレスを決める（引数 > 環境変数 > 既定値）
    pub fn bind_addr(&self) -> String {
        let host = self
            .host
            .clone()
            .unwrap_or_else(|| get_env_with_fallback_or("MODELMGR_HOST", "MODELMGR_HOST", "0.0.0.0"));
        let port = self
            .port
            .unwrap_or_else(|| get_env_with_fallback_parse("MODELMGR_PORT", "PORT", DEFAULT_PORT));
        format!("{}:{}", host, port)
    }
}

/// serve コマンドを実行
pub async fn execute(args: &ServeArgs) -> Result<(), anyhow::Error> {
    let state = crate::bootstrap::initialize(AppConfig::from_env()).await?;
    crate::server::run(state, &args.bind_addr()).await?;
    Ok(())
}
