//! 通信プロトコル定義
//!
//! ディスパッチAPIとクライアントWebSocketでやり取りするメッセージ型。

use serde::{Deserialize, Serialize};

/// クライアントに指示する操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchAction {
    /// ファイルを取得してインストール
    Download,
    /// インストール済みファイルを削除
    Delete,
}

impl DispatchAction {
    /// ワイヤ上の文字列表現
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Delete => "delete",
        }
    }
}

/// `POST /api/dispatch` のリクエストボディ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchRequest {
    /// 操作
    pub action: DispatchAction,
    /// 対象バージョンのカタログID
    pub model_version_id: u64,
    /// 送信先クライアントID
    #[serde(default)]
    pub client_id: String,
}

/// サーバー→クライアントのコマンドフレーム
///
/// フィールドは常にすべて送る（未使用のものは空文字）。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchCommand {
    /// 操作
    pub action: DispatchAction,
    /// 取得元URL（download時のみ、`/downloads/` 起点の相対URL）
    pub url: String,
    /// ファイル名（delete時は `<subdir>/<basename>`）
    pub filename: String,
    /// 保存先サブディレクトリ（delete時は空）
    pub subdirectory: String,
    /// 対象バージョンのカタログID
    pub model_version_id: u64,
    /// 送信先クライアントID
    pub client_id: String,
}

/// クライアント→サーバーの生フレーム
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientFrame {
    /// イベント種別 (`complete` / `deleted` / `error`)
    #[serde(rename = "type")]
    pub kind: String,
    /// 対象バージョンのカタログID
    #[serde(default)]
    pub model_version_id: u64,
}

/// 解釈済みのクライアント通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAck {
    /// インストール完了
    Complete(u64),
    /// 削除完了
    Deleted(u64),
}

impl ClientFrame {
    /// 状態遷移を伴う通知に変換する
    ///
    /// バージョンIDが0のフレームと未知の種別は `None`。
    pub fn into_ack(self) -> Option<ClientAck> {
        if self.model_version_id == 0 {
            return None;
        }
        match self.kind.as_str() {
            "complete" => Some(ClientAck::Complete(self.model_version_id)),
            "deleted" => Some(ClientAck::Deleted(self.model_version_id)),
            _ => None,
        }
    }
}
