//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! `MmError`は`status_code()`と`external_message()`を提供し、
//! API層はこの2つだけを見てレスポンスを組み立てます。

use axum::http::StatusCode;
use thiserror::Error;

/// Common layer error type
#[derive(Debug, Error)]
pub enum CommonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// model manager error type
#[derive(Debug, Error)]
pub enum MmError {
    /// Common layer error
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Catalog version not found
    #[error("Model version not found: {0}")]
    VersionNotFound(i64),

    /// Catalog version exists but has no file on disk
    #[error("Model version {0} has no local file")]
    NoLocalFile(i64),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// No live connection for the client
    #[error("Client not connected: {0}")]
    ClientNotConnected(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Upstream HTTP error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(String),

    /// Conflicting state (already exists, cancelled)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MmError {
    /// Shorthand for a validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Common(CommonError::Validation(message.into()))
    }

    /// Get a user-facing message without internal details
    ///
    /// Database paths, upstream URLs and io details stay in the logs.
    pub fn external_message(&self) -> String {
        match self {
            Self::Common(CommonError::Validation(msg)) => msg.clone(),
            Self::Common(_) => "Request error".to_string(),
            Self::VersionNotFound(_) => "Model version not found".to_string(),
            Self::NoLocalFile(_) => "Model version has no local file".to_string(),
            Self::NotFound(what) => format!("{} not found", what),
            Self::ClientNotConnected(_) => "client not connected".to_string(),
            Self::Database(_) => "Database error".to_string(),
            Self::Http(_) => "Upstream service unavailable".to_string(),
            Self::Io(_) => "File operation failed".to_string(),
            Self::Conflict(msg) => msg.clone(),
            Self::Authentication(_) => "Authentication failed".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Common(_) => StatusCode::BAD_REQUEST,
            Self::VersionNotFound(_) => StatusCode::NOT_FOUND,
            Self::NoLocalFile(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ClientNotConnected(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type alias (Common)
pub type CommonResult<T> = Result<T, CommonError>;

/// Result type alias (model manager)
pub type MmResult<T> = Result<T, MmError>;
