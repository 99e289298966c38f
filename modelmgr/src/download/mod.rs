//! ストリーミングダウンロード
//!
//! URLを1本ずつディスクへ書き出す。モデルルート配下への「プライマリ」
//! ダウンロードだけがプロセス全体の進捗とキャンセル対象に登録される。
//! プレビュー画像などの付随ダウンロードはグローバル状態に触れない。

use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// ルート判定に失敗したときに使うディレクトリ名マーカー
pub const PRIMARY_DIR_MARKER: &str = "downloads";

/// ダウンロードのエラー
///
/// `Cancelled` は失敗ではなく、呼び出し側は他のバリアントと区別して扱う。
#[derive(Debug, Error)]
pub enum DownloadError {
    /// `cancel_active` で中断された
    #[error("download cancelled")]
    Cancelled,

    /// HTTPリクエスト失敗
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// 2xx以外のレスポンス
    #[error("remote returned status {status} for {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Request URL
        url: String,
    },

    /// 一定時間データが届かなかった
    #[error("no data received for {0:?}")]
    Stalled(Duration),

    /// ファイル書き込み/削除の失敗
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// キャンセルによる中断か
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// 完了したダウンロード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// 書き出した絶対パス
    pub path: PathBuf,
    /// 書き込んだバイト数
    pub bytes_written: u64,
}

struct ActiveDownload {
    path: PathBuf,
    cancel: CancellationToken,
    token: u64,
}

#[derive(Default)]
struct DownloadState {
    active: Option<ActiveDownload>,
    progress: i64,
}

struct Inner {
    client: Client,
    model_root: PathBuf,
    stall_timeout: Option<Duration>,
    state: Mutex<DownloadState>,
    next_token: AtomicU64,
}

/// ダウンロードの進捗とキャンセルを一元管理する
///
/// `Clone` は同じ状態を共有する。
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

/// 登録解除ガード
///
/// drop時、登録中のトークンが自分のものなら解除する。
/// 後から登録された新しいダウンロードの状態には触れない。
struct Registration {
    inner: Arc<Inner>,
    token: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut state = lock_state(&self.inner.state);
        if state.active.as_ref().map(|a| a.token) == Some(self.token) {
            state.active = None;
        }
    }
}

fn lock_state(state: &Mutex<DownloadState>) -> MutexGuard<'_, DownloadState> {
    // 保持中にpanicしても状態は常に整合しているので poison は無視する
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DownloadCoordinator {
    /// 新しいコーディネーターを作成
    ///
    /// # Arguments
    /// * `client` - 共有HTTPクライアント
    /// * `model_root` - プライマリ判定の基準ディレクトリ
    /// * `stall_timeout` - チャンク間の無通信タイムアウト（None で無効）
    pub fn new(client: Client, model_root: impl Into<PathBuf>, stall_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                model_root: model_root.into(),
                stall_timeout,
                state: Mutex::new(DownloadState::default()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// 現在の進捗（0-100）
    pub fn progress(&self) -> i64 {
        lock_state(&self.inner.state).progress
    }

    /// プライマリダウンロードが登録中か
    pub fn is_active(&self) -> bool {
        lock_state(&self.inner.state).active.is_some()
    }

    /// 登録中ダウンロードの書き出し先
    pub fn active_path(&self) -> Option<PathBuf> {
        lock_state(&self.inner.state)
            .active
            .as_ref()
            .map(|a| a.path.clone())
    }

    /// 保存先がプライマリ扱いか判定する
    ///
    /// モデルルート配下（大文字小文字無視）か、パスに `downloads` を含む場合。
    pub fn is_primary(&self, dest_dir: &Path) -> bool {
        let dest = match std::path::absolute(dest_dir) {
            Ok(path) => path,
            Err(_) => dest_dir.to_path_buf(),
        };
        let root = match std::path::absolute(&self.inner.model_root) {
            Ok(path) => path,
            Err(_) => self.inner.model_root.clone(),
        };

        if lowercase_path(&dest).starts_with(lowercase_path(&root)) {
            return true;
        }
        dest_dir
            .to_string_lossy()
            .to_lowercase()
            .contains(PRIMARY_DIR_MARKER)
    }

    /// URLを `dest_dir/filename` にストリーミング保存する
    ///
    /// # Arguments
    /// * `url` - 取得元
    /// * `dest_dir` - 保存先ディレクトリ（無ければ作成）
    /// * `filename` - 保存ファイル名
    /// * `bearer` - リモートカタログの認証トークン
    ///
    /// # Returns
    /// * `Ok(DownloadOutcome)` - 保存先の絶対パスと書き込みバイト数
    /// * `Err(DownloadError::Cancelled)` - `cancel_active` で中断された
    pub async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        filename: &str,
        bearer: Option<&str>,
    ) -> Result<DownloadOutcome, DownloadError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = std::path::absolute(dest_dir.join(filename))?;

        let (cancel, registration) = if self.is_primary(dest_dir) {
            let (cancel, registration) = self.register(&path);
            (cancel, Some(registration))
        } else {
            (CancellationToken::new(), None)
        };

        let result = self
            .stream_to_file(url, &path, bearer, &cancel, registration.as_ref())
            .await;

        if matches!(result, Err(DownloadError::Cancelled)) {
            // cancel_active の削除より後に作られたファイルを残さない
            remove_if_exists(&path).await.ok();
        }
        drop(registration);
        result
    }

    /// 登録中のプライマリダウンロードを中断する
    ///
    /// # Returns
    /// * `Ok(true)` - 中断して部分ファイルを削除した
    /// * `Ok(false)` - 登録中のダウンロードが無い（状態は変えない）
    pub async fn cancel_active(&self) -> Result<bool, DownloadError> {
        let active = {
            let mut state = lock_state(&self.inner.state);
            let active = state.active.take();
            if active.is_some() {
                state.progress = 0;
            }
            active
        };

        let Some(active) = active else {
            return Ok(false);
        };

        info!(path = %active.path.display(), "Cancelling active download");
        active.cancel.cancel();
        remove_if_exists(&active.path).await?;
        Ok(true)
    }

    fn register(&self, path: &Path) -> (CancellationToken, Registration) {
        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        {
            let mut state = lock_state(&self.inner.state);
            if let Some(previous) = state.active.as_ref() {
                debug!(
                    previous = %previous.path.display(),
                    next = %path.display(),
                    "Primary download superseded"
                );
            }
            state.active = Some(ActiveDownload {
                path: path.to_path_buf(),
                cancel: cancel.clone(),
                token,
            });
            state.progress = 0;
        }
        (
            cancel,
            Registration {
                inner: self.inner.clone(),
                token,
            },
        )
    }

    /// 自分がまだ登録中のときだけ進捗を書き込む
    fn set_progress(&self, registration: Option<&Registration>, progress: i64) {
        let Some(registration) = registration else {
            return;
        };
        let mut state = lock_state(&self.inner.state);
        if state.active.as_ref().map(|a| a.token) == Some(registration.token) {
            state.progress = progress;
        }
    }

    async fn stream_to_file(
        &self,
        url: &str,
        path: &Path,
        bearer: Option<&str>,
        cancel: &CancellationToken,
        registration: Option<&Registration>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let mut request = self.inner.client.get(url);
        if let Some(token) = bearer.filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = request.send() => response?,
        };

        if !response.status().is_success() {
            return Err(DownloadError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length().filter(|len| *len > 0);
        debug!(url, path = %path.display(), ?total, "Download started");

        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = std::pin::pin!(response.bytes_stream());
        let mut written: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = self.next_chunk(&mut stream) => next?,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(total) = total {
                self.set_progress(registration, (written * 100 / total) as i64);
            }
        }

        file.flush().await?;
        self.set_progress(registration, 100);
        debug!(path = %path.display(), bytes = written, "Download finished");

        Ok(DownloadOutcome {
            path: path.to_path_buf(),
            bytes_written: written,
        })
    }

    async fn next_chunk<S>(&self, stream: &mut S) -> Result<Option<S::Item>, DownloadError>
    where
        S: futures::Stream + Unpin,
    {
        match self.inner.stall_timeout {
            Some(limit) => tokio::time::timeout(limit, stream.next())
                .await
                .map_err(|_| DownloadError::Stalled(limit)),
            None => Ok(stream.next().await),
        }
    }
}

fn lowercase_path(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().to_lowercase())
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
