//! クライアントごとのファイル状態の永続化
//!
//! 行の変更はディスパッチとクライアント通知、
//! それにオペレーターが明示的に実行する reset 系だけが行う。

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::common::error::{MmError, MmResult};
use crate::types::{ClientFile, ClientFileStatus};

#[derive(sqlx::FromRow)]
struct ClientFileRow {
    client_id: String,
    model_version_id: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ClientFileRow> for ClientFile {
    type Error = MmError;

    fn try_from(row: ClientFileRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<ClientFileStatus>()
            .map_err(MmError::Database)?;
        Ok(ClientFile {
            client_id: row.client_id,
            model_version_id: row.model_version_id,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 状態を書き込む（存在すれば上書き）
pub async fn upsert_status(
    pool: &SqlitePool,
    client_id: &str,
    model_version_id: i64,
    status: ClientFileStatus,
) -> MmResult<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO client_files (client_id, model_version_id, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(client_id, model_version_id)
        DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at
        "#,
    )
    .bind(client_id)
    .bind(model_version_id)
    .bind(status.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| MmError::Database(format!("Failed to upsert client file: {}", e)))?;

    Ok(())
}

/// 状態行を削除する。行が無くても成功扱い
pub async fn delete_status(
    pool: &SqlitePool,
    client_id: &str,
    model_version_id: i64,
) -> MmResult<bool> {
    let result =
        sqlx::query("DELETE FROM client_files WHERE client_id = ? AND model_version_id = ?")
            .bind(client_id)
            .bind(model_version_id)
            .execute(pool)
            .await
            .map_err(|e| MmError::Database(format!("Failed to delete client file: {}", e)))?;

    Ok(result.rows_affected() > 0)
}

/// 1件取得
pub async fn get_status(
    pool: &SqlitePool,
    client_id: &str,
    model_version_id: i64,
) -> MmResult<Option<ClientFile>> {
    let row = sqlx::query_as::<_, ClientFileRow>(
        r#"
        SELECT client_id, model_version_id, status, created_at, updated_at
        FROM client_files
        WHERE client_id = ? AND model_version_id = ?
        "#,
    )
    .bind(client_id)
    .bind(model_version_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| MmError::Database(format!("Failed to get client file: {}", e)))?;

    row.map(ClientFile::try_from).transpose()
}

/// 完了通知待ちの行を一覧する
///
/// # Arguments
/// * `client_id` - 指定時はそのクライアントのみ
/// * `older_than` - 指定時は最終更新からこの時間以上経過した行のみ
pub async fn list_pending(
    pool: &SqlitePool,
    client_id: Option<&str>,
    older_than: Option<Duration>,
) -> MmResult<Vec<ClientFile>> {
    let rows = match client_id {
        Some(client_id) => {
            sqlx::query_as::<_, ClientFileRow>(
                r#"
                SELECT client_id, model_version_id, status, created_at, updated_at
                FROM client_files
                WHERE status = 'pending' AND client_id = ?
                ORDER BY updated_at
                "#,
            )
            .bind(client_id)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, ClientFileRow>(
                r#"
                SELECT client_id, model_version_id, status, created_at, updated_at
                FROM client_files
                WHERE status = 'pending'
                ORDER BY updated_at
                "#,
            )
            .fetch_all(pool)
            .await
        }
    }
    .map_err(|e| MmError::Database(format!("Failed to list pending client files: {}", e)))?;

    let cutoff = older_than.map(|age| Utc::now() - age);
    rows.into_iter()
        .map(ClientFile::try_from)
        .filter(|file| match (file, cutoff) {
            (Ok(file), Some(cutoff)) => file.updated_at <= cutoff,
            _ => true,
        })
        .collect()
}

/// すべての pending 行を削除する（オペレーター操作）
pub async fn reset_all_pending(pool: &SqlitePool) -> MmResult<u64> {
    let result = sqlx::query("DELETE FROM client_files WHERE status = 'pending'")
        .execute(pool)
        .await
        .map_err(|e| MmError::Database(format!("Failed to reset pending: {}", e)))?;

    Ok(result.rows_affected())
}

/// 指定クライアントの pending 行を削除する（オペレーター操作）
pub async fn reset_pending_for_client(pool: &SqlitePool, client_id: &str) -> MmResult<u64> {
    let result =
        sqlx::query("DELETE FROM client_files WHERE status = 'pending' AND client_id = ?")
            .bind(client_id)
            .execute(pool)
            .await
            .map_err(|e| MmError::Database(format!("Failed to reset pending: {}", e)))?;

    Ok(result.rows_affected())
}
