//! 同期APIは呼び出し元の切断に影響されない

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::support::app::{wait_until, TestApp};

/// モデル5 / バージョン11。ファイル本体の応答だけ遅らせる
async fn mount_slow_upstream(server: &MockServer) {
    let uri = server.uri();
    Mock::given(method("GET"))
        .and(path("/api/v1/models/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 5,
            "name": "Detail Tweaker",
            "type": "LORA",
            "modelVersions": [{"id": 11}]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/model-versions/11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 11,
            "modelId": 5,
            "name": "v1.0",
            "files": [{
                "name": "detail.safetensors",
                "downloadUrl": format!("{}/files/detail.safetensors", uri)
            }]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/detail.safetensors"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![3u8; 512])
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(server)
        .await;
}

async fn post_and_give_up(url: String) {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let result = client.post(url).send().await;
    assert!(result.is_err(), "request should time out before the sync finishes");
}

async fn wait_for_version(app: &TestApp) {
    let pool = app.state.db_pool.clone();
    wait_until(|| {
        let pool = pool.clone();
        async move { modelmgr::db::catalog::count_versions(&pool).await.unwrap() == 1 }
    })
    .await;
}

#[tokio::test]
async fn model_sync_finishes_after_caller_disconnects() {
    let upstream = MockServer::start().await;
    mount_slow_upstream(&upstream).await;
    let app = TestApp::spawn_with_upstream(&upstream.uri()).await;

    post_and_give_up(app.server.http_url("/api/sync/5")).await;
    wait_for_version(&app).await;

    let file = app.model_root().join("LORA/detail.safetensors");
    assert_eq!(std::fs::metadata(file).unwrap().len(), 512);

    app.stop().await;
}

#[tokio::test]
async fn version_sync_finishes_after_caller_disconnects() {
    let upstream = MockServer::start().await;
    mount_slow_upstream(&upstream).await;
    let app = TestApp::spawn_with_upstream(&upstream.uri()).await;

    post_and_give_up(app.server.http_url("/api/sync/version/11")).await;
    wait_for_version(&app).await;

    let version = modelmgr::db::catalog::get_version(&app.state.db_pool, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(version.remote_version_id, 11);
    assert_eq!(version.file_path, "LORA/detail.safetensors");

    app.stop().await;
}
