//! 設定テーブルのストレージ層
//!
//! SQLiteベースのキーバリュー設定を永続化。
//! 環境変数より優先されるパス/認証情報の上書きに使う。

use crate::common::error::{MmError, MmResult};
use sqlx::SqlitePool;

/// モデルルートの設定キー
pub const MODEL_PATH_KEY: &str = "model_path";
/// 画像ルートの設定キー
pub const IMAGE_PATH_KEY: &str = "image_path";
/// リモートカタログAPIキーの設定キー
pub const CIVITAI_API_KEY_KEY: &str = "civitai_api_key";

/// 設定ストレージ
#[derive(Clone)]
pub struct SettingsStorage {
    pool: SqlitePool,
}

impl SettingsStorage {
    /// 新しいストレージインスタンスを作成
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 設定値を取得
    pub async fn get_setting(&self, key: &str) -> MmResult<Option<String>> {
        let result = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MmError::Database(format!("Failed to get setting: {}", e)))?;

        Ok(result)
    }

    /// 空白のみの値は未設定として扱う
    pub async fn get_non_empty(&self, key: &str) -> MmResult<Option<String>> {
        Ok(self
            .get_setting(key)
            .await?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    /// 設定値を保存（INSERT OR REPLACE）
    pub async fn set_setting(&self, key: &str, value: &str) -> MmResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| MmError::Database(format!("Failed to set setting: {}", e)))?;

        Ok(())
    }
}
