//! カタログ型定義
//!
//! リモートカタログから取り込んだモデル/バージョンと、
//! クライアントごとのインストール状態。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 取り込み済みモデル
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Model {
    /// カタログID
    pub id: i64,
    /// リモートカタログ上のID（一意）
    pub remote_id: i64,
    /// 表示名
    pub name: String,
    /// 種別（`LORA`, `Checkpoint` など）。配置サブディレクトリにもなる
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub model_type: String,
    /// 作者名
    pub creator_username: String,
    /// カンマ区切りタグ
    pub tags: String,
    /// NSFWフラグ
    pub nsfw: bool,
    /// 説明文
    pub description: String,
    /// 代表画像（画像ルートからの相対パス）
    pub image_path: String,
    /// 代表ファイル（モデルルートからの相対パス）
    pub file_path: String,
    /// 代表画像の幅
    pub image_width: i64,
    /// 代表画像の高さ
    pub image_height: i64,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
    /// 論理削除日時
    pub deleted_at: Option<DateTime<Utc>>,
}

/// モデル作成入力
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewModel {
    /// リモートカタログ上のID
    pub remote_id: i64,
    /// 表示名
    pub name: String,
    /// 種別
    pub model_type: String,
    /// 作者名
    pub creator_username: String,
    /// カンマ区切りタグ
    pub tags: String,
    /// NSFWフラグ
    pub nsfw: bool,
    /// 説明文
    pub description: String,
}

/// 取り込み済みバージョン
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Version {
    /// カタログID（ディスパッチの `model_version_id`）
    pub id: i64,
    /// 親モデルのカタログID
    pub model_id: i64,
    /// リモートカタログ上のバージョンID（一意）
    pub remote_version_id: i64,
    /// バージョン名
    pub name: String,
    /// ベースモデル
    pub base_model: String,
    /// 早期アクセス期間
    pub early_access_time_frame: i64,
    /// ファイルサイズ（KB）
    pub size_kb: f64,
    /// トリガーワード（カンマ区切り）
    pub trained_words: String,
    /// NSFWフラグ
    pub nsfw: bool,
    /// 種別
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub version_type: String,
    /// カンマ区切りタグ
    pub tags: String,
    /// 説明文
    pub description: String,
    /// 公開モード
    pub mode: String,
    /// リモートカタログ上のページURL
    pub model_url: String,
    /// リモート側作成日時（文字列のまま保持）
    pub remote_created_at: String,
    /// リモート側更新日時（文字列のまま保持）
    pub remote_updated_at: String,
    /// ファイルのSHA-256
    pub sha256: String,
    /// ダウンロード元URL
    pub download_url: String,
    /// ファイル（モデルルートからの相対パス）
    pub file_path: String,
    /// プレビュー画像（画像ルートからの相対パス）
    pub image_path: String,
    /// 作成日時
    pub created_at: DateTime<Utc>,
    /// 更新日時
    pub updated_at: DateTime<Utc>,
    /// 論理削除日時
    pub deleted_at: Option<DateTime<Utc>>,
}

/// バージョン作成入力
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewVersion {
    pub model_id: i64,
    pub remote_version_id: i64,
    pub name: String,
    pub base_model: String,
    pub early_access_time_frame: i64,
    pub size_kb: f64,
    pub trained_words: String,
    pub nsfw: bool,
    pub version_type: String,
    pub tags: String,
    pub description: String,
    pub mode: String,
    pub model_url: String,
    pub remote_created_at: String,
    pub remote_updated_at: String,
    pub sha256: String,
    pub download_url: String,
    pub file_path: String,
    pub image_path: String,
}

/// バージョンのプレビュー画像
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct VersionImage {
    pub id: i64,
    pub version_id: i64,
    /// 画像ルートからの相対パス
    pub path: String,
    pub width: i64,
    pub height: i64,
    /// SHA-256（hex）
    pub hash: String,
    /// 生成パラメータ等（JSONテキスト）
    pub meta: String,
    pub created_at: DateTime<Utc>,
}

/// プレビュー画像作成入力
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewVersionImage {
    pub version_id: i64,
    pub path: String,
    pub width: i64,
    pub height: i64,
    pub hash: String,
    pub meta: String,
}

/// クライアント上のファイル状態
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientFileStatus {
    /// ディスパッチ済み、完了通知待ち
    Pending,
    /// クライアントがインストール完了を通知済み
    Installed,
}

impl ClientFileStatus {
    /// DB/ワイヤ上の文字列表現
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Installed => "installed",
        }
    }
}

impl FromStr for ClientFileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "installed" => Ok(Self::Installed),
            other => Err(format!("unknown client file status: {}", other)),
        }
    }
}

impl std::fmt::Display for ClientFileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// (client_id, model_version_id) ごとの状態行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientFile {
    pub client_id: String,
    pub model_version_id: i64,
    pub status: ClientFileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
