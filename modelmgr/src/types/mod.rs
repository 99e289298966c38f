//! 型定義モジュール
//!
//! ドメインエンティティの型定義を提供

/// カタログ（モデル・バージョン・クライアント状態）の型定義
pub mod catalog;

pub use catalog::{
    ClientFile, ClientFileStatus, Model, NewModel, NewVersion, NewVersionImage, Version,
    VersionImage,
};
