//! ダウンロード対象ファイルとファイル名の選択

use std::path::Path;

use crate::civitai::RemoteFile;

/// プレビューとして扱わない動画拡張子
const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".webm", ".avi", ".mov", ".mkv", ".flv", ".wmv", ".m4v", ".mpeg", ".mpg", ".gif",
];

/// 優先ファイルを選ぶ（`.safetensors` 優先、無ければ先頭）
pub fn select_model_file(files: &[RemoteFile]) -> Option<&RemoteFile> {
    files
        .iter()
        .find(|f| f.name.to_lowercase().ends_with(".safetensors"))
        .or_else(|| files.first())
}

/// URLが動画/アニメーションを指すか（クエリは無視）
pub fn is_video_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// 保存先にファイル名を確保する
///
/// 同名があれば `<stem>_<versionId><ext>` にする。`create_new` で空ファイルを
/// 作って確保するので、同じ名前を並行するワーカーが取り合うことはない。
/// 呼び出し側は確保したファイルを上書きで書き出す。
pub async fn reserve_filename(
    dest_dir: &Path,
    filename: &str,
    version_id: i64,
) -> std::io::Result<String> {
    tokio::fs::create_dir_all(dest_dir).await?;
    if create_new(&dest_dir.join(filename)).await? {
        return Ok(filename.to_string());
    }

    let suffixed = suffixed_filename(filename, version_id);
    // バージョンIDは一意。既にあれば同じバージョンの取り直し
    create_new(&dest_dir.join(&suffixed)).await?;
    Ok(suffixed)
}

async fn create_new(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

fn suffixed_filename(filename: &str, version_id: i64) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, version_id, ext.to_string_lossy()),
        None => format!("{}_{}", stem, version_id),
    }
}

/// リモートのファイル名からディレクトリ成分を除く
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        "model.bin".to_string()
    } else {
        base.to_string()
    }
}
