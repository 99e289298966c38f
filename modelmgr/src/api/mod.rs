//! REST API / WebSocket ルーティング
//!
//! JSON APIは `/api` 配下。クライアント接続は `/ws`、
//! モデルファイルと画像は静的配信する。

pub mod clients;
pub mod clients_ws;
pub mod dispatch;
pub mod downloads;
pub mod error;
pub mod sync;
pub mod system;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// アプリケーションのルーターを作成
pub fn create_app(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/dispatch", post(dispatch::dispatch))
        .route("/download/progress", get(downloads::get_progress))
        .route("/download/cancel", post(downloads::cancel))
        .route("/sync", post(sync::sync_all))
        .route("/sync/{id}", post(sync::sync_model))
        .route("/sync/version/{version_id}", post(sync::sync_version))
        .route("/versions/{id}/refresh", post(sync::refresh_version))
        .route("/clients", get(clients::list_clients))
        .route("/client-files/pending", get(clients::list_pending))
        .route("/health", get(system::health));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(clients_ws::client_ws_handler))
        .nest_service("/downloads", ServeDir::new(&state.paths.model_root))
        .nest_service("/images", ServeDir::new(&state.paths.image_root))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::protocol::DispatchCommand;
    use crate::config::AppConfig;
    use crate::db::test_utils::test_db_pool;
    use crate::registry::Outbound;
    use crate::types::{ClientFileStatus, NewModel, NewVersion};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_state() -> (AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            database_url: "sqlite::memory:".into(),
            client_secret: Some("secret".into()),
            model_path: dir.path().join("downloads"),
            image_path: dir.path().join("images"),
            trash_dir: Some(dir.path().join("Trash")),
            civitai_base_url: "http://127.0.0.1:9".into(),
            ..Default::default()
        };
        let state = crate::bootstrap::build_app_state(test_db_pool().await, config)
            .await
            .unwrap();
        (state, dir)
    }

    async fn seed_version(state: &AppState) -> i64 {
        let model = crate::db::catalog::create_model(
            &state.db_pool,
            &NewModel {
                remote_id: 1,
                model_type: "LORA".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        crate::db::catalog::create_version(
            &state.db_pool,
            &NewVersion {
                model_id: model.id,
                remote_version_id: 100,
                file_path: "LORA/detail.safetensors".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_to_unconnected_client_is_503_and_pending() {
        let (state, _dir) = test_state().await;
        let id = seed_version(&state).await;
        let app = create_app(state.clone());

        let (status, body) = call(
            app,
            post_json(
                "/api/dispatch",
                json!({"action": "download", "model_version_id": id, "client_id": "agent"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, json!({"error": "client not connected"}));

        let row = state
            .client_files
            .get_status("agent", id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, ClientFileStatus::Pending);
    }

    #[tokio::test]
    async fn test_dispatch_to_connected_client() {
        let (state, _dir) = test_state().await;
        let id = seed_version(&state).await;
        let (conn, mut rx) = state.registry.open_connection("agent");
        state.registry.register(conn).await;

        let (status, body) = call(
            create_app(state.clone()),
            post_json(
                "/api/dispatch",
                json!({"action": "download", "model_version_id": id, "client_id": "agent"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "dispatched"}));

        let Some(Outbound::Text(frame)) = rx.recv().await else {
            panic!("frame not delivered");
        };
        let command: DispatchCommand = serde_json::from_str(&frame).unwrap();
        assert_eq!(command.url, "/downloads/LORA/detail.safetensors");
    }

    #[tokio::test]
    async fn test_dispatch_validation_statuses() {
        let (state, _dir) = test_state().await;
        let id = seed_version(&state).await;

        let cases = [
            (json!({"action": "download", "model_version_id": id}), StatusCode::BAD_REQUEST),
            (
                json!({"action": "explode", "model_version_id": id, "client_id": "a"}),
                StatusCode::BAD_REQUEST,
            ),
            (
                json!({"action": "download", "model_version_id": 999, "client_id": "a"}),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (body, expected) in cases {
            let (status, _) = call(create_app(state.clone()), post_json("/api/dispatch", body)).await;
            assert_eq!(status, expected);
        }

        let (status, _) = call(
            create_app(state.clone()),
            Request::builder()
                .method("POST")
                .uri("/api/dispatch")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_download_progress_and_cancel() {
        let (state, _dir) = test_state().await;

        let (status, body) = call(
            create_app(state.clone()),
            Request::get("/api/download/progress").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"progress": 0}));

        for _ in 0..2 {
            let (status, body) = call(
                create_app(state.clone()),
                Request::post("/api/download/cancel").body(Body::empty()).unwrap(),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({"message": "No active download"}));
        }
    }

    #[tokio::test]
    async fn test_ws_requires_auth_before_upgrade() {
        let (state, _dir) = test_state().await;

        let (status, _) = call(
            create_app(state.clone()),
            Request::get("/ws?client_id=agent&key=wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            create_app(state.clone()),
            Request::get("/ws?key=secret").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_static_downloads_and_health() {
        let (state, _dir) = test_state().await;
        let file = state.paths.model_root.join("LORA").join("a.bin");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"weights").unwrap();

        let response = create_app(state.clone())
            .oneshot(Request::get("/downloads/LORA/a.bin").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"weights");

        let (status, body) = call(
            create_app(state.clone()),
            Request::get("/api/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connected_clients"], 0);
    }

    #[tokio::test]
    async fn test_pending_listing() {
        let (state, _dir) = test_state().await;
        state
            .client_files
            .upsert_status("a", 1, ClientFileStatus::Pending)
            .await
            .unwrap();
        state
            .client_files
            .upsert_status("b", 2, ClientFileStatus::Installed)
            .await
            .unwrap();

        let (status, body) = call(
            create_app(state.clone()),
            Request::get("/api/client-files/pending").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["client_id"], "a");

        let (_, body) = call(
            create_app(state.clone()),
            Request::get("/api/client-files/pending?older_than_secs=3600")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_refresh_unknown_version_is_404() {
        let (state, _dir) = test_state().await;
        let (status, body) = call(
            create_app(state),
            Request::post("/api/versions/99/refresh?fields=images")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Model version not found"}));
    }
}
