//! 接続中クライアントの登録管理
//!
//! クライアントIDごとに1本の接続ハンドルを保持する。
//! 同じIDで再接続すると古いハンドルは置き換えられ、閉じられる。
//!
//! 1接続への書き込みは送信キューを介して単一のライタータスクだけが行う。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::common::error::{MmError, MmResult};

/// 接続あたりの送信キュー長
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// ライタータスクへ渡すフレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSONテキストフレーム
    Text(String),
}

/// 1本のクライアント接続
#[derive(Debug)]
pub struct ClientConnection {
    client_id: String,
    conn_id: u64,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Outbound>,
    closed: CancellationToken,
}

impl ClientConnection {
    /// クライアントID
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// 接続ごとに一意なID
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// 接続日時
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// 閉じられたときに完了するトークン
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    /// 接続を閉じる（ライターはCloseフレームを送って終了する）
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// 閉じられているか
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.outbound.is_closed()
    }

    /// JSONとして送信キューに積む
    pub async fn send_json<T: Serialize>(&self, payload: &T) -> MmResult<()> {
        if self.is_closed() {
            return Err(MmError::ClientNotConnected(self.client_id.clone()));
        }
        let text = serde_json::to_string(payload)
            .map_err(|e| MmError::Internal(format!("Failed to encode frame: {}", e)))?;
        self.outbound
            .send(Outbound::Text(text))
            .await
            .map_err(|_| MmError::ClientNotConnected(self.client_id.clone()))
    }
}

/// 接続一覧の表示用
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectedClient {
    /// クライアントID
    pub client_id: String,
    /// 接続日時
    pub connected_at: DateTime<Utc>,
}

/// クライアント登録簿
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<String, Arc<ClientConnection>>>>,
    next_conn_id: Arc<AtomicU64>,
}

impl ClientRegistry {
    /// 空の登録簿を作成
    pub fn new() -> Self {
        Self::default()
    }

    /// 新しい接続ハンドルと、そのライターが読む受信側を作る
    ///
    /// 作っただけでは登録されない。
    pub fn open_connection(
        &self,
        client_id: impl Into<String>,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let conn = ClientConnection {
            client_id: client_id.into(),
            conn_id: self.next_conn_id.fetch_add(1, Ordering::SeqCst) + 1,
            connected_at: Utc::now(),
            outbound: tx,
            closed: CancellationToken::new(),
        };
        (Arc::new(conn), rx)
    }

    /// 接続を登録する。同じIDの既存接続は閉じて返す
    pub async fn register(&self, conn: Arc<ClientConnection>) -> Option<Arc<ClientConnection>> {
        let replaced = {
            let mut clients = self.clients.write().await;
            clients.insert(conn.client_id.clone(), conn.clone())
        };
        if let Some(old) = replaced.as_ref() {
            info!(
                client_id = %conn.client_id,
                old_conn = old.conn_id,
                new_conn = conn.conn_id,
                "Client reconnected, closing previous connection"
            );
            old.close();
        }
        replaced
    }

    /// 登録を外す。登録中のハンドルが `conn_id` と一致するときだけ
    pub async fn deregister(&self, client_id: &str, conn_id: u64) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get(client_id) {
            Some(current) if current.conn_id == conn_id => {
                clients.remove(client_id);
                true
            }
            Some(_) => {
                debug!(client_id, conn_id, "Stale connection, registry entry kept");
                false
            }
            None => false,
        }
    }

    /// 接続ハンドルを取得
    pub async fn get(&self, client_id: &str) -> Option<Arc<ClientConnection>> {
        self.clients.read().await.get(client_id).cloned()
    }

    /// クライアントへJSONフレームを送る
    ///
    /// # Returns
    /// * `Err(MmError::ClientNotConnected)` - 接続が無い、または閉じている
    pub async fn send<T: Serialize>(&self, client_id: &str, payload: &T) -> MmResult<()> {
        let conn = self
            .get(client_id)
            .await
            .ok_or_else(|| MmError::ClientNotConnected(client_id.to_string()))?;
        conn.send_json(payload).await
    }

    /// 接続中クライアント一覧（ID順）
    pub async fn list(&self) -> Vec<ConnectedClient> {
        let mut clients: Vec<_> = self
            .clients
            .read()
            .await
            .values()
            .map(|c| ConnectedClient {
                client_id: c.client_id.clone(),
                connected_at: c.connected_at,
            })
            .collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        clients
    }

    /// 接続数
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// 登録が空か
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// すべての接続を閉じて登録を空にする
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.clients.write().await.drain().map(|(_, c)| c).collect();
        for conn in &drained {
            conn.close();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Closed all client connections");
        }
    }
}
