//! 共通型定義
//!
//! エラー型とワイヤプロトコル

/// エラー型
pub mod error;

/// ディスパッチ/クライアント間のメッセージ
pub mod protocol;
