//! sync サブコマンド
//!
//! リモートカタログを一度だけ同期して終了します。
//! Ctrl+C で実行中のダウンロードをキャンセルします。

use clap::Args;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::sync::SyncReport;

/// sync サブコマンドの引数
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SyncArgs {
    /// Sync only this remote model id
    #[arg(long)]
    pub model_id: Option<i64>,
}

/// sync コマンドを実行
pub async fn execute(args: &SyncArgs) -> Result<(), anyhow::Error> {
    let state = crate::bootstrap::initialize(AppConfig::from_env()).await?;
    let synchronizer = state.synchronizer.clone();
    let api_key = state.civitai_api_key.clone();

    let run = async {
        match args.model_id {
            Some(model_id) => synchronizer.sync_model(model_id, api_key.as_deref()).await,
            None => synchronizer.sync_all(api_key.as_deref()).await,
        }
    };
    tokio::pin!(run);

    let report: SyncReport = loop {
        tokio::select! {
            result = &mut run => break result?,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    break (&mut run).await?;
                }
                info!("Interrupted, cancelling active download");
                state.downloads.cancel_active().await?;
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
