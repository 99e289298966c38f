//! `/ws` 接続の認証・登録・再接続

use futures::StreamExt;
use reqwest::StatusCode;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Error, Message};

use crate::support::app::{wait_until, TestApp, TEST_SECRET};

async fn handshake_status(app: &TestApp, query: &str) -> StatusCode {
    let request = app
        .server
        .ws_url(&format!("/ws{}", query))
        .into_client_request()
        .unwrap();
    match tokio_tungstenite::connect_async(request).await {
        Ok(_) => StatusCode::SWITCHING_PROTOCOLS,
        Err(Error::Http(response)) => StatusCode::from_u16(response.status().as_u16()).unwrap(),
        Err(e) => panic!("unexpected handshake error: {}", e),
    }
}

#[tokio::test]
async fn rejects_bad_secret_and_missing_client_id() {
    let app = TestApp::spawn().await;

    assert_eq!(
        handshake_status(&app, "?key=wrong&client_id=agent").await,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        handshake_status(&app, "?client_id=agent").await,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        handshake_status(&app, &format!("?key={}", TEST_SECRET)).await,
        StatusCode::BAD_REQUEST
    );
    assert!(app.state.registry.is_empty().await);

    app.stop().await;
}

#[tokio::test]
async fn query_credentials_register_the_client() {
    let app = TestApp::spawn().await;

    let request = app
        .server
        .ws_url(&format!("/ws?key={}&client_id=agent-q", TEST_SECRET))
        .into_client_request()
        .unwrap();
    let (_socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let registry = app.state.registry.clone();
    wait_until(|| {
        let registry = registry.clone();
        async move { registry.get("agent-q").await.is_some() }
    })
    .await;

    app.stop().await;
}

#[tokio::test]
async fn disconnect_removes_registration() {
    let app = TestApp::spawn().await;
    let mut socket = app.connect("agent").await;
    assert_eq!(app.state.registry.len().await, 1);

    socket.close(None).await.unwrap();
    let registry = app.state.registry.clone();
    wait_until(|| {
        let registry = registry.clone();
        async move { registry.is_empty().await }
    })
    .await;

    app.stop().await;
}

#[tokio::test]
async fn reconnect_replaces_and_closes_previous_connection() {
    let app = TestApp::spawn().await;
    let mut first = app.connect("agent").await;
    let first_conn = app.state.registry.get("agent").await.unwrap().conn_id();

    let mut second = app.connect("agent").await;
    let registry = app.state.registry.clone();
    wait_until(|| {
        let registry = registry.clone();
        async move {
            registry
                .get("agent")
                .await
                .is_some_and(|conn| conn.conn_id() != first_conn)
        }
    })
    .await;

    // 古い接続はサーバーから閉じられる
    let closed = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "previous connection was not closed");

    // 古い接続の後始末で新しい登録は消えない
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(app.state.registry.len().await, 1);

    let version_id = app.seed_version(100, "detail.safetensors").await;
    let response = app.dispatch("download", version_id, "agent").await;
    assert_eq!(response.status(), StatusCode::OK);
    let frame = crate::support::app::next_json(&mut second).await;
    assert_eq!(frame["model_version_id"], version_id);

    app.stop().await;
}
