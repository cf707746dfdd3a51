use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::store::{StoreError, StoreErrorKind};

/// Log target for orphaned rows or blobs. Operators route this target to a durable sink.
pub const INTEGRITY_TARGET: &str = "vaultkeeper::integrity";

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("File type {0} is banned")]
    PolicyBanned(String),

    #[error("File of type {file_type} is {size} bytes, allowed maximum is {allowed}")]
    PolicySizeExceeded {
        file_type: String,
        size: i64,
        allowed: i64,
    },

    #[error("File type {0} could not be registered")]
    PolicyUnknownType(String),

    #[error("Storage quota exceeded: {current} bytes used, {proposed} requested, limit {limit}")]
    QuotaExceeded {
        current: i64,
        proposed: i64,
        limit: i64,
    },

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Gave up after {0} attempts due to concurrent claims")]
    Contention(usize),

    #[error("Metadata store deadline exceeded")]
    StoreTimeout,

    #[error("Metadata store error: {0}")]
    Store(StoreError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// True when the error reports a lost race on the metadata store and the whole
    /// transaction may be retried.
    pub fn is_serialization_conflict(&self) -> bool {
        matches!(self, AppError::Store(e) if e.kind == StoreErrorKind::SerializationConflict)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err.kind {
            StoreErrorKind::Timeout => AppError::StoreTimeout,
            StoreErrorKind::NotFound => AppError::NotFound(err.message),
            _ => AppError::Store(err),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from(err).into()
    }
}

/// A row or blob left without its counterpart. Logged for operators, never returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityFault {
    pub blob_id: String,
    pub reason: String,
}

impl IntegrityFault {
    pub fn orphaned_blob(blob_id: &str, reason: impl Into<String>) -> Self {
        Self {
            blob_id: blob_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn report(&self) {
        tracing::error!(
            target: INTEGRITY_TARGET,
            blob_id = %self.blob_id,
            reason = %self.reason,
            "orphaned blob left on content store"
        );
    }
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn with_code(code: i32, message: &str, data: T) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: &str) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.to_string(),
            data: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::PolicyBanned(_) | AppError::PolicyUnknownType(_) => {
                (StatusCode::BAD_REQUEST, 400, self.to_string())
            }
            AppError::PolicySizeExceeded { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, 413, self.to_string())
            }
            AppError::QuotaExceeded { .. } => {
                (StatusCode::INSUFFICIENT_STORAGE, 507, self.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 404, msg.clone()),
            AppError::Contention(attempts) => {
                tracing::warn!("Claim gave up after {} attempts", attempts);
                (StatusCode::SERVICE_UNAVAILABLE, 503, "Vault is busy, retry later".to_string())
            }
            AppError::StoreTimeout => {
                tracing::error!("Metadata store deadline exceeded");
                (StatusCode::GATEWAY_TIMEOUT, 504, "Metadata store timeout".to_string())
            }
            AppError::BlobNotFound(id) => {
                tracing::error!("Blob {} missing from content store", id);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Stored content missing".to_string())
            }
            AppError::DecryptionFailed(msg) => {
                tracing::error!("Decryption failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Failed to decrypt file".to_string())
            }
            AppError::Store(e) => {
                tracing::error!("Metadata store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Database error".to_string())
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, 401, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, 403, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, 400, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, msg.clone())
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "IO error".to_string())
            }
        };

        let body = Json(ApiResponse::<()>::error(code, &message));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_timeout_maps_to_store_timeout() {
        let err: AppError = StoreError::new(StoreErrorKind::Timeout, "pool timed out").into();
        assert!(matches!(err, AppError::StoreTimeout));
    }

    #[test]
    fn test_conflict_is_retriable() {
        let err: AppError =
            StoreError::new(StoreErrorKind::SerializationConflict, "database is locked").into();
        assert!(err.is_serialization_conflict());
        assert!(!AppError::NotFound("x".to_string()).is_serialization_conflict());
    }

    #[test]
    fn test_status_codes() {
        let resp = AppError::NotFound("nothing".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = AppError::Contention(5).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let resp = AppError::QuotaExceeded {
            current: 10,
            proposed: 5,
            limit: 12,
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::INSUFFICIENT_STORAGE);
    }
}
