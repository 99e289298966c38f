//! プレビュー画像のハッシュと寸法

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// ファイルのSHA-256（hex小文字）
pub async fn file_sha256(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha256_blocking(&path))
        .await
        .map_err(std::io::Error::other)?
}

fn sha256_blocking(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 32 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// 画像の幅と高さ（ヘッダーだけ読む）
///
/// 保存名は常に `.jpg` なので拡張子ではなく中身で形式を判別する。
/// 判別できない形式は `None`。
pub async fn image_dimensions(path: &Path) -> Option<(i64, i64)> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        image::ImageReader::open(&path)
            .ok()?
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    })
    .await
    .ok()
    .flatten()
    .map(|(w, h)| (i64::from(w), i64::from(h)))
}
