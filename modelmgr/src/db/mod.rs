//! データベースアクセス層
//!
//! SQLiteベースのデータ永続化

/// カタログ（モデル・バージョン・画像）
pub mod catalog;

/// クライアントごとのファイル状態
pub mod client_files;

/// データベースマイグレーション
pub mod migrations;

/// 設定管理
pub mod settings;

/// Repository traitパターン（テスタビリティ向上）
pub mod traits;
