//! freedesktop.org 形式のゴミ箱
//!
//! `<root>/files/<name>` に実体を移し、`<root>/info/<name>.trashinfo` に
//! 元のパスと削除日時を書く。同名がある場合は `<name>.1`, `<name>.2` … を使う。

use chrono::Local;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// ゴミ箱操作のエラー
#[derive(Debug, Error)]
pub enum TrashError {
    /// 対象が存在しない
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// ゴミ箱ルートを決められない
    #[error("trash directory could not be determined")]
    NoTrashDir,

    /// ファイル操作の失敗
    #[error("I/O error on {path}: {source}")]
    Io {
        /// 対象パス
        path: PathBuf,
        /// 元のエラー
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> TrashError + '_ {
    move |source| TrashError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// ゴミ箱
#[derive(Debug, Clone)]
pub struct TrashBin {
    root: PathBuf,
}

impl TrashBin {
    /// 任意のルートを使う
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$XDG_DATA_HOME/Trash`（未設定なら `~/.local/share/Trash`）
    pub fn user_default() -> Result<Self, TrashError> {
        dirs::data_local_dir()
            .map(|dir| Self::new(dir.join("Trash")))
            .ok_or(TrashError::NoTrashDir)
    }

    /// ゴミ箱ルート
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// ファイルをゴミ箱へ移動する
    ///
    /// # Returns
    /// * `Ok(PathBuf)` - ゴミ箱内の移動先
    pub async fn move_to_trash(&self, path: &Path) -> Result<PathBuf, TrashError> {
        let source = std::path::absolute(path).map_err(io_err(path))?;
        if !tokio::fs::try_exists(&source).await.map_err(io_err(&source))? {
            return Err(TrashError::NotFound(source));
        }

        let files_dir = self.root.join("files");
        let info_dir = self.root.join("info");
        tokio::fs::create_dir_all(&files_dir)
            .await
            .map_err(io_err(&files_dir))?;
        tokio::fs::create_dir_all(&info_dir)
            .await
            .map_err(io_err(&info_dir))?;

        let base_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let trash_name = self.unused_name(&files_dir, &info_dir, &base_name).await?;
        let target = files_dir.join(&trash_name);

        let info_path = info_dir.join(format!("{}.trashinfo", trash_name));
        let info_body = trash_info(&source, &Local::now().format("%Y-%m-%dT%H:%M:%S").to_string());
        tokio::fs::write(&info_path, info_body)
            .await
            .map_err(io_err(&info_path))?;

        if let Err(e) = move_file(&source, &target).await {
            tokio::fs::remove_file(&info_path).await.ok();
            return Err(io_err(&source)(e));
        }

        info!(from = %source.display(), to = %target.display(), "Moved file to trash");
        Ok(target)
    }

    async fn unused_name(
        &self,
        files_dir: &Path,
        info_dir: &Path,
        base_name: &str,
    ) -> Result<String, TrashError> {
        let mut candidate = base_name.to_string();
        let mut counter = 1u32;
        loop {
            let taken_file = tokio::fs::try_exists(files_dir.join(&candidate))
                .await
                .map_err(io_err(files_dir))?;
            let taken_info = tokio::fs::try_exists(info_dir.join(format!("{}.trashinfo", candidate)))
                .await
                .map_err(io_err(info_dir))?;
            if !taken_file && !taken_info {
                return Ok(candidate);
            }
            candidate = format!("{}.{}", base_name, counter);
            counter += 1;
        }
    }
}

/// rename できないとき（別ファイルシステム）はコピーして消す
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "rename failed, falling back to copy");
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

fn trash_info(original: &Path, deletion_date: &str) -> String {
    let encoded = original
        .to_string_lossy()
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!(
        "[Trash Info]\nPath={}\nDeletionDate={}\n",
        encoded, deletion_date
    )
}
