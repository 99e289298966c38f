//! APIエラーレスポンス型
//!
//! axum用の共通エラーハンドリング

use axum::{response::IntoResponse, Json};
use serde_json::json;
use tracing::error;

use crate::common::error::MmError;

/// Axum用のエラーレスポンス型
#[derive(Debug)]
pub struct AppError(pub MmError);

impl<E> From<E> for AppError
where
    E: Into<MmError>,
{
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            // 内部の詳細はログにのみ残す
            error!(error = %self.0, status = status.as_u16(), "Request failed");
        }

        let payload = json!({
            "error": self.0.external_message()
        });

        (status, Json(payload)).into_response()
    }
}
