use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

/// Errors raised by the photo lifecycle and its collaborators
#[derive(thiserror::Error, Debug)]
pub enum PhotoError {
    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Photo not found: {0}")]
    PhotoNotFound(i64),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("User {user_id} is not allowed to modify photo {photo_id}")]
    Unauthorized { photo_id: i64, user_id: i64 },

    #[error("Photo upload failed: {0}")]
    PhotoUploadFailed(#[source] Box<PhotoError>),

    #[error("Storage upload failed: {0}")]
    StorageUploadFailed(String),

    #[error("Storage download failed: {0}")]
    StorageDownloadFailed(String),

    #[error("Storage delete failed: {0}")]
    StorageDeleteFailed(String),

    #[error("Photo delete failed: {0}")]
    FileDeleteFailed(#[source] Box<PhotoError>),

    #[error("Session scheduling failed: {0}")]
    SessionSchedulingFailed(String),

    #[error("Database error: {0}")]
    Database(String),
}

pub type PhotoResult<T> = Result<T, PhotoError>;

impl PhotoError {
    /// Wrap a validation or storage failure raised while creating a photo
    pub fn upload_failed(cause: PhotoError) -> Self {
        PhotoError::PhotoUploadFailed(Box::new(cause))
    }

    /// Relational store failure, keeping the whole context chain
    pub fn database(e: anyhow::Error) -> Self {
        PhotoError::Database(format!("{:#}", e))
    }

    /// Innermost error, looking through the wrapping variants
    pub fn root(&self) -> &PhotoError {
        match self {
            PhotoError::PhotoUploadFailed(inner) | PhotoError::FileDeleteFailed(inner) => {
                inner.root()
            }
            other => other,
        }
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PhotoError::UserNotFound(_) => "USER_NOT_FOUND",
            PhotoError::PhotoNotFound(_) => "PHOTO_NOT_FOUND",
            PhotoError::InvalidOperation(_) => "INVALID_OPERATION",
            PhotoError::InvalidFile(_) => "INVALID_FILE",
            PhotoError::Unauthorized { .. } => "UNAUTHORIZED",
            PhotoError::PhotoUploadFailed(_) => "PHOTO_UPLOAD_FAILED",
            PhotoError::StorageUploadFailed(_) => "STORAGE_UPLOAD_FAILED",
            PhotoError::StorageDownloadFailed(_) => "STORAGE_DOWNLOAD_FAILED",
            PhotoError::StorageDeleteFailed(_) => "STORAGE_DELETE_FAILED",
            PhotoError::FileDeleteFailed(_) => "FILE_DELETE_FAILED",
            PhotoError::SessionSchedulingFailed(_) => "SESSION_SCHEDULING_FAILED",
            PhotoError::Database(_) => "DATABASE_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PhotoError::UserNotFound(_) | PhotoError::PhotoNotFound(_) => StatusCode::NOT_FOUND,
            PhotoError::InvalidOperation(_) | PhotoError::InvalidFile(_) => {
                StatusCode::BAD_REQUEST
            }
            PhotoError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            PhotoError::PhotoUploadFailed(inner) | PhotoError::FileDeleteFailed(inner) => {
                inner.status_code()
            }
            PhotoError::StorageUploadFailed(_)
            | PhotoError::StorageDownloadFailed(_)
            | PhotoError::StorageDeleteFailed(_)
            | PhotoError::SessionSchedulingFailed(_) => StatusCode::BAD_GATEWAY,
            PhotoError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for PhotoError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, code = self.code(), "Request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                code: self.code().to_string(),
            }),
        )
            .into_response()
    }
}
