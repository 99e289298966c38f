use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use modelmgr::config::AppConfig;
use modelmgr::types::{NewModel, NewVersion};
use modelmgr::AppState;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::http::{spawn_server, TestServer};

pub const TEST_SECRET: &str = "test-secret";

pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 実ポートで動くテスト用サーバーと、その状態
pub struct TestApp {
    pub state: AppState,
    pub server: TestServer,
    _dir: TempDir,
}

#[allow(dead_code)]
impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_upstream("http://127.0.0.1:9").await
    }

    /// リモートカタログの向き先を指定して起動する
    pub async fn spawn_with_upstream(civitai_base_url: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            database_url: "sqlite::memory:".into(),
            client_secret: Some(TEST_SECRET.into()),
            model_path: dir.path().join("downloads"),
            image_path: dir.path().join("images"),
            trash_dir: Some(dir.path().join("Trash")),
            civitai_base_url: civitai_base_url.into(),
            ..Default::default()
        };
        let pool = modelmgr::db::migrations::initialize_database(&config.database_url)
            .await
            .unwrap();
        let state = modelmgr::bootstrap::build_app_state(pool, config)
            .await
            .unwrap();
        let server = spawn_server(modelmgr::api::create_app(state.clone())).await;

        Self {
            state,
            server,
            _dir: dir,
        }
    }

    /// カタログにバージョンを1件登録してIDを返す
    pub async fn seed_version(&self, remote_version_id: i64, file_name: &str) -> i64 {
        let model = match modelmgr::db::catalog::find_model_by_remote_id(&self.state.db_pool, 1)
            .await
            .unwrap()
        {
            Some(model) => model,
            None => modelmgr::db::catalog::create_model(
                &self.state.db_pool,
                &NewModel {
                    remote_id: 1,
                    name: "detailer".into(),
                    model_type: "LORA".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap(),
        };
        modelmgr::db::catalog::create_version(
            &self.state.db_pool,
            &NewVersion {
                model_id: model.id,
                remote_version_id,
                file_path: format!("LORA/{}", file_name),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id
    }

    /// クライアントとして接続する
    pub async fn connect(&self, client_id: &str) -> ClientSocket {
        let mut request = self.server.ws_url("/ws").into_client_request().unwrap();
        request.headers_mut().insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", TEST_SECRET)).unwrap(),
        );
        request
            .headers_mut()
            .insert("x-client-id", HeaderValue::from_str(client_id).unwrap());
        let (socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();

        let registry = self.state.registry.clone();
        let id = client_id.to_string();
        wait_until(|| {
            let registry = registry.clone();
            let id = id.clone();
            async move { registry.get(&id).await.is_some() }
        })
        .await;
        socket
    }

    /// ディスパッチAPIを呼ぶ
    pub async fn dispatch(&self, action: &str, version_id: i64, client_id: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.server.http_url("/api/dispatch"))
            .json(&serde_json::json!({
                "action": action,
                "model_version_id": version_id,
                "client_id": client_id,
            }))
            .send()
            .await
            .unwrap()
    }

    /// モデルルート
    pub fn model_root(&self) -> std::path::PathBuf {
        self.state.paths.model_root.clone()
    }

    pub async fn stop(self) {
        // 接続が残っていると graceful shutdown が終わらない
        self.state.registry.close_all().await;
        self.server.stop().await;
    }
}

/// 次のテキストフレームをJSONとして読む
#[allow(dead_code)]
pub async fn next_json(socket: &mut ClientSocket) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended before a text frame: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for frame");
    serde_json::from_str(&frame).unwrap()
}

/// 条件が真になるまで待つ（最大5秒）
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
