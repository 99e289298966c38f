//! データベース初期化とマイグレーション実行

use crate::common::error::MmError;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool,
};
use std::str::FromStr;

/// SQLiteデータベース接続プールを作成してマイグレーションを実行
///
/// # Arguments
/// * `database_url` - データベースURL（例: "sqlite:data/modelmgr.db"）
///
/// # Returns
/// * `Ok(SqlitePool)` - 初期化済みデータベースプール
/// * `Err(MmError)` - 初期化失敗
pub async fn initialize_database(database_url: &str) -> Result<SqlitePool, MmError> {
    if !database_url.contains(":memory:")
        && !Sqlite::database_exists(database_url)
            .await
            .map_err(|e| MmError::Database(format!("Failed to check database: {}", e)))?
    {
        tracing::info!("Creating database: {}", database_url);
        Sqlite::create_database(database_url)
            .await
            .map_err(|e| MmError::Database(format!("Failed to create database: {}", e)))?;
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| MmError::Database(format!("Invalid database URL: {}", e)))?
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(if database_url.contains(":memory:") { 1 } else { 8 })
        .connect_with(options)
        .await
        .map_err(|e| MmError::Database(format!("Failed to connect to database: {}", e)))?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// マイグレーションを実行（sqlx::migrate!マクロを使用）
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), MmError> {
    tracing::info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| MmError::Database(format!("Failed to run migrations: {}", e)))?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
