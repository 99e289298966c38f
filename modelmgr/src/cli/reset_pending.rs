//! reset-pending サブコマンド
//!
//! 完了通知が届かないまま残った pending 行を削除します。
//! サーバーは自動では削除しないため、オペレーターが明示的に実行します。

use clap::Args;

use crate::config::AppConfig;
use crate::db::client_files;

/// reset-pending サブコマンドの引数
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ResetPendingArgs {
    /// Only reset rows of this client
    #[arg(long)]
    pub client_id: Option<String>,
}

/// reset-pending コマンドを実行
pub async fn execute(args: &ResetPendingArgs) -> Result<(), anyhow::Error> {
    let config = AppConfig::from_env();
    let pool = crate::db::migrations::initialize_database(&config.database_url).await?;

    let removed = run(&pool, args).await?;
    match args.client_id.as_deref() {
        Some(client_id) => println!("Removed {} pending row(s) for {}", removed, client_id),
        None => println!("Removed {} pending row(s)", removed),
    }
    Ok(())
}

async fn run(pool: &sqlx::SqlitePool, args: &ResetPendingArgs) -> crate::common::error::MmResult<u64> {
    match args.client_id.as_deref().filter(|id| !id.is_empty()) {
        Some(client_id) => client_files::reset_pending_for_client(pool, client_id).await,
        None => client_files::reset_all_pending(pool).await,
    }
}
