//! axumサーバー起動・シャットダウンハンドリング

use std::future::Future;

use crate::common::error::{MmError, MmResult};
use crate::AppState;
use tracing::{info, warn};

/// axumサーバーを起動し、Ctrl+C / SIGTERM を待機する
pub async fn run(state: AppState, bind_addr: &str) -> MmResult<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| MmError::Io(format!("Failed to bind to {}: {}", bind_addr, e)))?;

    info!("Model manager listening on {}", bind_addr);
    serve(state, listener, shutdown_signal()).await
}

/// `shutdown` が完了するまで配信する
///
/// 終了時はすべてのクライアント接続を閉じる。
pub async fn serve<F>(state: AppState, listener: tokio::net::TcpListener, shutdown: F) -> MmResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let app = crate::api::create_app(state);

    let signal_registry = registry.clone();
    let shutdown = async move {
        shutdown.await;
        // WebSocket接続が残っていると graceful shutdown が終わらない
        signal_registry.close_all().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| MmError::Io(format!("Server error: {}", e)))?;

    registry.close_all().await;
    info!("Server shutdown complete");
    Ok(())
}

/// シャットダウンシグナルを待機
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn serve_stops_on_shutdown_and_closes_clients() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            database_url: "sqlite::memory:".into(),
            model_path: dir.path().join("downloads"),
            image_path: dir.path().join("images"),
            trash_dir: Some(dir.path().join("Trash")),
            ..Default::default()
        };
        let pool = crate::db::test_utils::test_db_pool().await;
        let state = crate::bootstrap::build_app_state(pool, config).await.unwrap();

        let (conn, _outbound) = state.registry.open_connection("agent");
        state.registry.register(conn.clone()).await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(state.clone(), listener, async {
            let _ = rx.await;
        }));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), server)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .unwrap();
        assert!(conn.is_closed());
        assert!(state.registry.is_empty().await);
    }
}
