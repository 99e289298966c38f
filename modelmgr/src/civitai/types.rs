//! リモートカタログのレスポンス型

use serde::{Deserialize, Serialize};

/// 作者
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Creator {
    /// ユーザー名
    #[serde(default)]
    pub username: String,
}

/// モデル（一覧・詳細共通）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteModel {
    /// リモートID
    pub id: i64,
    /// 名前
    #[serde(default)]
    pub name: String,
    /// 種別
    #[serde(default, rename = "type")]
    pub model_type: String,
    /// 説明（HTML）
    #[serde(default)]
    pub description: Option<String>,
    /// NSFWフラグ
    #[serde(default)]
    pub nsfw: bool,
    /// タグ
    #[serde(default)]
    pub tags: Vec<String>,
    /// 公開モード（Archived など）
    #[serde(default)]
    pub mode: Option<String>,
    /// 作者
    #[serde(default)]
    pub creator: Option<Creator>,
    /// バージョン一覧
    #[serde(default)]
    pub model_versions: Vec<RemoteVersion>,
}

/// バージョン（モデル内のサマリー / 単体詳細共通）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteVersion {
    /// リモートバージョンID
    pub id: i64,
    /// 親モデルのリモートID（単体取得時のみ）
    #[serde(default)]
    pub model_id: Option<i64>,
    /// 名前
    #[serde(default)]
    pub name: String,
    /// ベースモデル
    #[serde(default)]
    pub base_model: String,
    /// 早期アクセス期間
    #[serde(default)]
    pub early_access_time_frame: i64,
    /// トリガーワード
    #[serde(default)]
    pub trained_words: Vec<String>,
    /// 作成日時（文字列のまま）
    #[serde(default)]
    pub created_at: String,
    /// 更新日時（文字列のまま）
    #[serde(default)]
    pub updated_at: String,
    /// ファイル
    #[serde(default)]
    pub files: Vec<RemoteFile>,
    /// プレビュー画像
    #[serde(default)]
    pub images: Vec<RemoteImage>,
}

/// ファイルのハッシュ
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileHashes {
    /// SHA-256
    #[serde(default, rename = "SHA256")]
    pub sha256: Option<String>,
}

/// ダウンロード可能なファイル
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// ファイル名
    #[serde(default)]
    pub name: String,
    /// ダウンロードURL
    #[serde(default)]
    pub download_url: String,
    /// サイズ（KB）
    #[serde(default, rename = "sizeKB")]
    pub size_kb: f64,
    /// ハッシュ
    #[serde(default)]
    pub hashes: FileHashes,
}

/// プレビュー画像
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteImage {
    /// 画像URL
    #[serde(default)]
    pub url: String,
    /// 縮小版URL
    #[serde(default)]
    pub url_small: Option<String>,
    /// 幅
    #[serde(default)]
    pub width: i64,
    /// 高さ
    #[serde(default)]
    pub height: i64,
    /// blurhash等
    #[serde(default)]
    pub hash: Option<String>,
    /// 生成パラメータ
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

impl RemoteImage {
    /// 取得に使うURL（`url` が空なら `urlSmall`）
    pub fn source_url(&self) -> Option<&str> {
        if !self.url.is_empty() {
            return Some(&self.url);
        }
        self.url_small.as_deref().filter(|u| !u.is_empty())
    }
}

/// `/api/v1/models` のレスポンス
///
/// 公式APIは `items` で包むが、配列をそのまま返すミラーもある。
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ModelListResponse {
    Envelope { items: Vec<RemoteModel> },
    Bare(Vec<RemoteModel>),
}

impl ModelListResponse {
    pub(crate) fn into_items(self) -> Vec<RemoteModel> {
        match self {
            Self::Envelope { items } => items,
            Self::Bare(items) => items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_with_versions() {
        let json = r#"{
            "id": 4201,
            "name": "Realistic Vision",
            "type": "Checkpoint",
            "nsfw": false,
            "tags": ["photorealistic"],
            "creator": {"username": "SG_161222"},
            "modelVersions": [{
                "id": 130072,
                "name": "V5.1",
                "baseModel": "SD 1.5",
                "trainedWords": [],
                "files": [{
                    "name": "realisticVision.safetensors",
                    "downloadUrl": "https://civitai.com/api/download/models/130072",
                    "sizeKB": 2082642.5,
                    "hashes": {"SHA256": "ABC"}
                }],
                "images": [{"url": "https://img/1.jpeg", "width": 512, "height": 768, "meta": {"seed": 1}}]
            }]
        }"#;

        let model: RemoteModel = serde_json::from_str(json).unwrap();
        assert_eq!(model.model_type, "Checkpoint");
        assert_eq!(model.creator.unwrap().username, "SG_161222");
        let version = &model.model_versions[0];
        assert_eq!(version.base_model, "SD 1.5");
        assert_eq!(version.files[0].size_kb, 2082642.5);
        assert_eq!(version.files[0].hashes.sha256.as_deref(), Some("ABC"));
        assert_eq!(version.images[0].source_url(), Some("https://img/1.jpeg"));
    }

    #[test]
    fn test_image_source_falls_back_to_small() {
        let image = RemoteImage {
            url_small: Some("https://img/small.jpg".to_string()),
            ..Default::default()
        };
        assert_eq!(image.source_url(), Some("https://img/small.jpg"));
        assert_eq!(RemoteImage::default().source_url(), None);
    }

    #[test]
    fn test_model_list_accepts_both_shapes() {
        let wrapped: ModelListResponse =
            serde_json::from_str(r#"{"items":[{"id":1}],"metadata":{}}"#).unwrap();
        assert_eq!(wrapped.into_items().len(), 1);

        let bare: ModelListResponse = serde_json::from_str(r#"[{"id":1},{"id":2}]"#).unwrap();
        assert_eq!(bare.into_items().len(), 2);
    }
}
