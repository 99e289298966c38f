//! カタログ（models / versions / version_images）のCRUD
//!
//! 通常の参照は論理削除済み行を除外する。
//! リモートIDでの存在確認だけは削除済み行も含める（再取り込み防止）。

use chrono::Utc;
use sqlx::SqlitePool;

use crate::common::error::{MmError, MmResult};
use crate::types::{Model, NewModel, NewVersion, NewVersionImage, Version, VersionImage};

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> MmError {
    move |e| MmError::Database(format!("{}: {}", context, e))
}

/// リモートIDでモデルを検索（論理削除済みも含む）
///
/// `remote_id` は一意制約付きなので、削除済み行を見落とすと作成時に衝突する。
pub async fn find_model_by_remote_id(pool: &SqlitePool, remote_id: i64) -> MmResult<Option<Model>> {
    sqlx::query_as::<_, Model>("SELECT * FROM models WHERE remote_id = ?")
        .bind(remote_id)
        .fetch_optional(pool)
        .await
        .map_err(db_err("Failed to find model"))
}

/// IDでモデルを取得
pub async fn get_model(pool: &SqlitePool, id: i64) -> MmResult<Option<Model>> {
    sqlx::query_as::<_, Model>("SELECT * FROM models WHERE id = ? AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_err("Failed to get model"))
}

/// モデルを作成
pub async fn create_model(pool: &SqlitePool, model: &NewModel) -> MmResult<Model> {
    let now = Utc::now();
    sqlx::query_as::<_, Model>(
        r#"
        INSERT INTO models (
            remote_id, name, type, creator_username, tags, nsfw, description,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(model.remote_id)
    .bind(&model.name)
    .bind(&model.model_type)
    .bind(&model.creator_username)
    .bind(&model.tags)
    .bind(model.nsfw)
    .bind(&model.description)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(db_err("Failed to create model"))
}

/// 種別が空のモデルに種別を補完する
pub async fn backfill_model_type(pool: &SqlitePool, id: i64, model_type: &str) -> MmResult<bool> {
    let result = sqlx::query(
        "UPDATE models SET type = ?, updated_at = ? WHERE id = ? AND type = ''",
    )
    .bind(model_type)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .map_err(db_err("Failed to update model type"))?;

    Ok(result.rows_affected() > 0)
}

/// 代表画像が未設定なら設定する
pub async fn set_model_image_if_empty(
    pool: &SqlitePool,
    id: i64,
    image_path: &str,
    width: i64,
    height: i64,
) -> MmResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE models
        SET image_path = ?, image_width = ?, image_height = ?, updated_at = ?
        WHERE id = ? AND image_path = ''
        "#,
    )
    .bind(image_path)
    .bind(width)
    .bind(height)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .map_err(db_err("Failed to update model image"))?;

    Ok(result.rows_affected() > 0)
}

/// 代表ファイルが未設定なら設定する
pub async fn set_model_file_if_empty(pool: &SqlitePool, id: i64, file_path: &str) -> MmResult<bool> {
    let result = sqlx::query(
        "UPDATE models SET file_path = ?, updated_at = ? WHERE id = ? AND file_path = ''",
    )
    .bind(file_path)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .map_err(db_err("Failed to update model file"))?;

    Ok(result.rows_affected() > 0)
}

/// リモートバージョンIDが既知か（論理削除済みも含む）
pub async fn version_exists(pool: &SqlitePool, remote_version_id: i64) -> MmResult<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM versions WHERE remote_version_id = ?")
            .bind(remote_version_id)
            .fetch_one(pool)
            .await
            .map_err(db_err("Failed to check version"))?;

    Ok(count > 0)
}

/// IDでバージョンを取得
pub async fn get_version(pool: &SqlitePool, id: i64) -> MmResult<Option<Version>> {
    sqlx::query_as::<_, Version>("SELECT * FROM versions WHERE id = ? AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_err("Failed to get version"))
}

/// バージョンを作成
pub async fn create_version(pool: &SqlitePool, version: &NewVersion) -> MmResult<Version> {
    let now = Utc::now();
    sqlx::query_as::<_, Version>(
        r#"
        INSERT INTO versions (
            model_id, remote_version_id, name, base_model, early_access_time_frame,
            size_kb, trained_words, nsfw, type, tags, description, mode, model_url,
            remote_created_at, remote_updated_at, sha256, download_url, file_path,
            image_path, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(version.model_id)
    .bind(version.remote_version_id)
    .bind(&version.name)
    .bind(&version.base_model)
    .bind(version.early_access_time_frame)
    .bind(version.size_kb)
    .bind(&version.trained_words)
    .bind(version.nsfw)
    .bind(&version.version_type)
    .bind(&version.tags)
    .bind(&version.description)
    .bind(&version.mode)
    .bind(&version.model_url)
    .bind(&version.remote_created_at)
    .bind(&version.remote_updated_at)
    .bind(&version.sha256)
    .bind(&version.download_url)
    .bind(&version.file_path)
    .bind(&version.image_path)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(db_err("Failed to create version"))
}

/// バージョンのプレビュー画像パスを設定
pub async fn set_version_image_path(pool: &SqlitePool, id: i64, image_path: &str) -> MmResult<()> {
    sqlx::query("UPDATE versions SET image_path = ?, updated_at = ? WHERE id = ?")
        .bind(image_path)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .map_err(db_err("Failed to update version image"))?;

    Ok(())
}

/// モデルの可変項目を書き戻す
pub async fn update_model(pool: &SqlitePool, model: &Model) -> MmResult<()> {
    sqlx::query(
        r#"
        UPDATE models
        SET name = ?, type = ?, tags = ?, nsfw = ?, description = ?,
            image_path = ?, image_width = ?, image_height = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&model.name)
    .bind(&model.model_type)
    .bind(&model.tags)
    .bind(model.nsfw)
    .bind(&model.description)
    .bind(&model.image_path)
    .bind(model.image_width)
    .bind(model.image_height)
    .bind(Utc::now())
    .bind(model.id)
    .execute(pool)
    .await
    .map_err(db_err("Failed to update model"))?;

    Ok(())
}

/// バージョンのメタデータと画像パスを書き戻す
///
/// `file_path` とリモートIDは変更しない。
pub async fn update_version(pool: &SqlitePool, version: &Version) -> MmResult<()> {
    sqlx::query(
        r#"
        UPDATE versions
        SET name = ?, base_model = ?, early_access_time_frame = ?, size_kb = ?,
            trained_words = ?, nsfw = ?, type = ?, tags = ?, description = ?, mode = ?,
            model_url = ?, remote_created_at = ?, remote_updated_at = ?, sha256 = ?,
            download_url = ?, image_path = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&version.name)
    .bind(&version.base_model)
    .bind(version.early_access_time_frame)
    .bind(version.size_kb)
    .bind(&version.trained_words)
    .bind(version.nsfw)
    .bind(&version.version_type)
    .bind(&version.tags)
    .bind(&version.description)
    .bind(&version.mode)
    .bind(&version.model_url)
    .bind(&version.remote_created_at)
    .bind(&version.remote_updated_at)
    .bind(&version.sha256)
    .bind(&version.download_url)
    .bind(&version.image_path)
    .bind(Utc::now())
    .bind(version.id)
    .execute(pool)
    .await
    .map_err(db_err("Failed to update version"))?;

    Ok(())
}

/// バージョンを論理削除
pub async fn soft_delete_version(pool: &SqlitePool, id: i64) -> MmResult<bool> {
    let result = sqlx::query(
        "UPDATE versions SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .map_err(db_err("Failed to delete version"))?;

    Ok(result.rows_affected() > 0)
}

/// プレビュー画像を登録
pub async fn create_version_image(
    pool: &SqlitePool,
    image: &NewVersionImage,
) -> MmResult<VersionImage> {
    sqlx::query_as::<_, VersionImage>(
        r#"
        INSERT INTO version_images (version_id, path, width, height, hash, meta, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(image.version_id)
    .bind(&image.path)
    .bind(image.width)
    .bind(image.height)
    .bind(&image.hash)
    .bind(&image.meta)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .map_err(db_err("Failed to create version image"))
}

/// バージョンのプレビュー画像一覧
pub async fn list_version_images(pool: &SqlitePool, version_id: i64) -> MmResult<Vec<VersionImage>> {
    sqlx::query_as::<_, VersionImage>(
        "SELECT * FROM version_images WHERE version_id = ? ORDER BY id",
    )
    .bind(version_id)
    .fetch_all(pool)
    .await
    .map_err(db_err("Failed to list version images"))
}

/// バージョンのプレビュー画像行をすべて削除
pub async fn delete_version_images(pool: &SqlitePool, version_id: i64) -> MmResult<u64> {
    let result = sqlx::query("DELETE FROM version_images WHERE version_id = ?")
        .bind(version_id)
        .execute(pool)
        .await
        .map_err(db_err("Failed to delete version images"))?;

    Ok(result.rows_affected())
}

/// モデル件数（論理削除済みを除く）
pub async fn count_models(pool: &SqlitePool) -> MmResult<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM models WHERE deleted_at IS NULL")
        .fetch_one(pool)
        .await
        .map_err(db_err("Failed to count models"))
}

/// バージョン件数（論理削除済みを除く）
pub async fn count_versions(pool: &SqlitePool) -> MmResult<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM versions WHERE deleted_at IS NULL")
        .fetch_one(pool)
        .await
        .map_err(db_err("Failed to count versions"))
}
