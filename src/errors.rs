use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Failures of the chunk-tracking and merge core.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload identity `{fingerprint}` invalid: {reason}")]
    InvalidIdentity { fingerprint: String, reason: String },
    #[error("filename `{filename}` invalid: {reason}")]
    InvalidFilename { filename: String, reason: String },
    #[error("chunk index `{0}` is not a non-negative integer")]
    InvalidChunkIndex(String),
    #[error("total chunk count must be at least 1, got {0}")]
    InvalidChunkCount(u32),
    #[error("no upload in progress for `{0}`")]
    NoSuchUpload(String),
    #[error("upload `{identity}` is incomplete: chunk {missing_index} not found")]
    IncompleteUpload { identity: String, missing_index: u32 },
    #[error("a merge for upload `{0}` is already running")]
    MergeInProgress(String),
    #[error("failed to write `{path}`: {source}")]
    StorageWrite {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read `{path}`: {source}")]
    StorageRead {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("merge failed at `{path}`: {source}")]
    MergeIo {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("chunk payload could not be received: {0}")]
    Payload(#[source] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

impl UploadError {
    /// Stable machine-readable name of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::InvalidIdentity { .. } => "InvalidIdentity",
            UploadError::InvalidFilename { .. } => "InvalidFilename",
            UploadError::InvalidChunkIndex(_) => "InvalidChunkIndex",
            UploadError::InvalidChunkCount(_) => "InvalidChunkCount",
            UploadError::NoSuchUpload(_) => "NoSuchUpload",
            UploadError::IncompleteUpload { .. } => "IncompleteUpload",
            UploadError::MergeInProgress(_) => "MergeInProgress",
            UploadError::StorageWrite { .. } => "StorageWriteError",
            UploadError::StorageRead { .. } => "StorageReadError",
            UploadError::MergeIo { .. } => "MergeIOError",
            UploadError::Payload(_) => "PayloadError",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            UploadError::InvalidIdentity { .. }
            | UploadError::InvalidFilename { .. }
            | UploadError::InvalidChunkIndex(_)
            | UploadError::InvalidChunkCount(_)
            | UploadError::Payload(_) => StatusCode::BAD_REQUEST,
            UploadError::NoSuchUpload(_) => StatusCode::NOT_FOUND,
            UploadError::IncompleteUpload { .. } | UploadError::MergeInProgress(_) => {
                StatusCode::CONFLICT
            }
            UploadError::StorageWrite { .. }
            | UploadError::StorageRead { .. }
            | UploadError::MergeIo { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    pub missing_index: Option<u32>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, kind: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: msg.into(),
            missing_index: None,
        }
    }

    /// Shortcut for a 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BadRequest", msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "error": self.message,
            "kind": self.kind,
            "status": self.status.as_u16()
        });
        if let Some(index) = self.missing_index {
            body["missingIndex"] = json!(index);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(kind = err.kind(), "{}", err);
        } else {
            tracing::debug!(kind = err.kind(), "{}", err);
        }

        let mut app = AppError::new(status, err.kind(), err.to_string());
        if let UploadError::IncompleteUpload { missing_index, .. } = err {
            app.missing_index = Some(missing_index);
        }
        app
    }
}
