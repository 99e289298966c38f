//! Model manager server
//!
//! リモートカタログからモデルを取り込み、接続中のクライアントへ配布する

#![warn(missing_docs)]

/// 共通型定義（エラー・ワイヤ形式）
pub mod common;

/// REST API / WebSocketハンドラー
pub mod api;

/// サーバー初期化
pub mod bootstrap;

/// リモートカタログクライアント
pub mod civitai;

/// CLIインターフェース
pub mod cli;

/// 設定管理（環境変数ヘルパー）
pub mod config;

/// データベースアクセス
pub mod db;

/// ディスパッチプロトコル
pub mod dispatch;

/// ダウンロード管理
pub mod download;

/// ロギング初期化ユーティリティ
pub mod logging;

/// 接続クライアント登録簿
pub mod registry;

/// axumサーバー起動
pub mod server;

/// カタログ同期
pub mod sync;

/// ゴミ箱
pub mod trash;

/// 型定義
pub mod types;

use std::sync::Arc;

/// アプリケーション状態
#[derive(Clone)]
pub struct AppState {
    /// データベース接続プール
    pub db_pool: sqlx::SqlitePool,
    /// 起動時に読み込んだ設定
    pub config: Arc<config::AppConfig>,
    /// モデル/画像ルート（設定テーブル優先で確定済み）
    pub paths: config::StoragePaths,
    /// リモートカタログ用のAPIキー（設定テーブル優先で確定済み）
    pub civitai_api_key: Option<String>,
    /// ダウンロード管理
    pub downloads: download::DownloadCoordinator,
    /// 接続クライアント登録簿
    pub registry: registry::ClientRegistry,
    /// ディスパッチサービス
    pub dispatch: dispatch::DispatchService,
    /// カタログ同期
    pub synchronizer: sync::Synchronizer,
    /// クライアント状態ストレージ
    pub client_files: Arc<dyn db::traits::ClientFileRepository>,
}
