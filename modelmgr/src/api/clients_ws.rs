//! WebSocket endpoint for download clients
//!
//! Clients connect to `/ws` with the shared secret and their client id.
//! The server pushes dispatch commands; clients answer with
//! `{"type":"complete"|"deleted","model_version_id":N}` frames.
//!
//! Authentication runs before the upgrade, so a rejected client never
//! reaches the registry.

use axum::extract::ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::AppError;
use crate::common::error::MmError;
use crate::dispatch::DispatchService;
use crate::registry::{ClientConnection, ClientRegistry, Outbound};
use crate::AppState;

/// クライアントIDを渡すヘッダー
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// `/ws` のクエリ
#[derive(Debug, Default, Deserialize)]
pub struct ClientWsQuery {
    /// 共有シークレット
    pub key: Option<String>,
    /// クライアントID
    pub client_id: Option<String>,
}

/// WebSocket upgrade handler for download clients
pub async fn client_ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ClientWsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Err(e) = authenticate(state.config.client_secret.as_deref(), &headers, &query) {
        warn!("Client connection rejected: {}", e);
        return AppError(e).into_response();
    }

    let Some(client_id) = client_id(&headers, &query) else {
        return AppError(MmError::validation("client id is required")).into_response();
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let dispatch = state.dispatch.clone();
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| serve_client(socket, client_id, registry, dispatch))
}

fn authenticate(
    secret: Option<&str>,
    headers: &HeaderMap,
    query: &ClientWsQuery,
) -> Result<(), MmError> {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return Err(MmError::Authentication(
            "client secret is not configured".into(),
        ));
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim())
        .filter(|value| !value.is_empty())
        .or(query.key.as_deref());

    match presented {
        Some(key) if key == secret => Ok(()),
        Some(_) => Err(MmError::Authentication("invalid client secret".into())),
        None => Err(MmError::Authentication("missing client secret".into())),
    }
}

fn client_id(headers: &HeaderMap, query: &ClientWsQuery) -> Option<String> {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .or_else(|| query.client_id.as_deref().map(str::trim))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

async fn serve_client(
    socket: WebSocket,
    client_id: String,
    registry: ClientRegistry,
    dispatch: DispatchService,
) {
    let (conn, outbound) = registry.open_connection(client_id.clone());
    registry.register(conn.clone()).await;
    info!(client_id = %client_id, conn_id = conn.conn_id(), "Client connected");

    let (sender, mut receiver) = socket.split();
    let writer = tokio::spawn(write_frames(sender, outbound, conn.clone()));

    loop {
        tokio::select! {
            _ = conn.closed().cancelled() => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    dispatch.handle_client_frame(&client_id, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client_id = %client_id, "WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    }

    conn.close();
    if let Err(e) = writer.await {
        warn!(client_id = %client_id, "Writer task failed: {}", e);
    }
    registry.deregister(&client_id, conn.conn_id()).await;
    info!(client_id = %client_id, conn_id = conn.conn_id(), "Client disconnected");
}

async fn write_frames(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound: tokio::sync::mpsc::Receiver<Outbound>,
    conn: Arc<ClientConnection>,
) {
    loop {
        tokio::select! {
            _ = conn.closed().cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sender.send(Message::Text(text.into())).await {
                        debug!(client_id = conn.client_id(), "Failed to send frame: {}", e);
                        conn.close();
                        return;
                    }
                }
                None => break,
            }
        }
    }
    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn query(key: Option<&str>, client_id: Option<&str>) -> ClientWsQuery {
        ClientWsQuery {
            key: key.map(String::from),
            client_id: client_id.map(String::from),
        }
    }

    #[test]
    fn test_authenticate_header_forms() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("s3cret"));
        assert!(authenticate(Some("s3cret"), &headers, &query(None, None)).is_ok());

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer s3cret"),
        );
        assert!(authenticate(Some("s3cret"), &headers, &query(None, None)).is_ok());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("wrong"));
        assert!(authenticate(Some("s3cret"), &headers, &query(Some("s3cret"), None)).is_err());
    }

    #[test]
    fn test_empty_authorization_falls_back_to_query_key() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(""));
        assert!(authenticate(Some("s3cret"), &headers, &query(Some("s3cret"), None)).is_ok());
        assert!(authenticate(Some("s3cret"), &headers, &query(None, None)).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(authenticate(Some("s3cret"), &headers, &query(Some("s3cret"), None)).is_ok());
        assert!(authenticate(Some("s3cret"), &headers, &query(Some("wrong"), None)).is_err());
    }

    #[test]
    fn test_authenticate_query_and_missing_secret() {
        let headers = HeaderMap::new();
        assert!(authenticate(Some("k"), &headers, &query(Some("k"), None)).is_ok());
        assert!(authenticate(Some("k"), &headers, &query(None, None)).is_err());
        assert!(authenticate(None, &headers, &query(Some("k"), None)).is_err());
        assert!(authenticate(Some(""), &headers, &query(Some(""), None)).is_err());
    }

    #[test]
    fn test_client_id_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_id(&headers, &query(None, Some("q"))), Some("q".into()));
        assert_eq!(client_id(&headers, &query(None, Some("  "))), None);

        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("h"));
        assert_eq!(client_id(&headers, &query(None, Some("q"))), Some("h".into()));

        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static(""));
        assert_eq!(client_id(&headers, &query(None, Some("q"))), Some("q".into()));
    }
}
