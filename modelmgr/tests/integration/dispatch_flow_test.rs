//! ディスパッチから完了通知までの往復

use futures::SinkExt;
use modelmgr::types::ClientFileStatus;
use reqwest::StatusCode;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use crate::support::app::{next_json, wait_until, TestApp};

#[tokio::test]
async fn download_command_is_delivered_and_acknowledged() {
    let app = TestApp::spawn().await;
    let version_id = app.seed_version(100, "detail.safetensors").await;
    let mut socket = app.connect("agent").await;

    let response = app.dispatch("download", version_id, "agent").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.json::<serde_json::Value>().await.unwrap(),
        json!({"status": "dispatched"})
    );

    let frame = next_json(&mut socket).await;
    assert_eq!(
        frame,
        json!({
            "action": "download",
            "url": "/downloads/LORA/detail.safetensors",
            "filename": "detail.safetensors",
            "subdirectory": "LORA",
            "model_version_id": version_id,
            "client_id": "agent",
        })
    );

    let client_files = app.state.client_files.clone();
    let status = client_files.get_status("agent", version_id).await.unwrap();
    assert_eq!(status.map(|row| row.status), Some(ClientFileStatus::Pending));

    socket
        .send(Message::Text(
            json!({"type": "complete", "model_version_id": version_id})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    wait_until(|| {
        let client_files = client_files.clone();
        async move {
            client_files
                .get_status("agent", version_id)
                .await
                .unwrap()
                .is_some_and(|row| row.status == ClientFileStatus::Installed)
        }
    })
    .await;

    let response = app.dispatch("delete", version_id, "agent").await;
    assert_eq!(response.status(), StatusCode::OK);
    let frame = next_json(&mut socket).await;
    assert_eq!(frame["action"], "delete");
    assert_eq!(frame["filename"], "LORA/detail.safetensors");
    assert_eq!(frame["subdirectory"], "");
    assert!(client_files
        .get_status("agent", version_id)
        .await
        .unwrap()
        .is_none());

    app.stop().await;
}

#[tokio::test]
async fn garbage_frames_keep_the_connection_open() {
    let app = TestApp::spawn().await;
    let version_id = app.seed_version(100, "detail.safetensors").await;
    let mut socket = app.connect("agent").await;

    for text in [
        "not json".to_string(),
        json!({"type": "complete", "model_version_id": 0}).to_string(),
        json!({"type": "progress", "model_version_id": version_id}).to_string(),
    ] {
        socket.send(Message::Text(text.into())).await.unwrap();
    }
    socket
        .send(Message::Text(
            json!({"type": "complete", "model_version_id": 7})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    // 同一接続のフレームは到着順に処理される
    let client_files = app.state.client_files.clone();
    wait_until(|| {
        let client_files = client_files.clone();
        async move { client_files.get_status("agent", 7).await.unwrap().is_some() }
    })
    .await;
    assert!(client_files
        .get_status("agent", version_id)
        .await
        .unwrap()
        .is_none());

    let response = app.dispatch("download", version_id, "agent").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(next_json(&mut socket).await["action"], "download");

    app.stop().await;
}

#[tokio::test]
async fn dispatch_after_disconnect_is_503_and_stays_pending() {
    let app = TestApp::spawn().await;
    let version_id = app.seed_version(100, "detail.safetensors").await;
    let mut socket = app.connect("agent").await;
    socket.close(None).await.unwrap();

    let registry = app.state.registry.clone();
    wait_until(|| {
        let registry = registry.clone();
        async move { registry.is_empty().await }
    })
    .await;

    let response = app.dispatch("download", version_id, "agent").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response.json::<serde_json::Value>().await.unwrap(),
        json!({"error": "client not connected"})
    );

    let pending = app
        .state
        .client_files
        .list_pending(Some("agent"), None)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].model_version_id, version_id);

    app.stop().await;
}
