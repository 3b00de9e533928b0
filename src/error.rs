//! Error types for the Course Sync server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::remote::RemoteError;
use crate::store::StoreError;
use crate::sync::SyncError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn store_status(e: &StoreError) -> (StatusCode, &'static str, String) {
    match e {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", e.to_string()),
        StoreError::InvalidParent { .. } | StoreError::KindMismatch { .. } => {
            (StatusCode::BAD_REQUEST, "bad_request", e.to_string())
        }
        StoreError::Database(_) | StoreError::Corrupt { .. } | StoreError::Serialization(_) => {
            tracing::error!("Store error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database_error",
                "Database error".to_string(),
            )
        }
    }
}

fn remote_status(e: &RemoteError) -> (StatusCode, &'static str, String) {
    match e {
        RemoteError::NotFound { .. } => (StatusCode::NOT_FOUND, "remote_not_found", e.to_string()),
        RemoteError::Auth(_) => (StatusCode::FORBIDDEN, "remote_auth", e.to_string()),
        RemoteError::Transient(_) => {
            tracing::warn!("Remote unavailable: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "remote_unavailable", e.to_string())
        }
        RemoteError::Rejected { .. } | RemoteError::Decode(_) => {
            tracing::error!("Remote error: {}", e);
            (StatusCode::BAD_GATEWAY, "remote_error", e.to_string())
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Store(e) => store_status(e),
            AppError::Sync(e) => match e {
                SyncError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", e.to_string()),
                SyncError::WrongKind { .. } => (StatusCode::BAD_REQUEST, "bad_request", e.to_string()),
                SyncError::NotSynced { .. }
                | SyncError::ParentNotSynced { .. }
                | SyncError::AlreadySynced { .. }
                | SyncError::HasSyncedChildren { .. }
                | SyncError::ParentNotLinked { .. } => {
                    (StatusCode::CONFLICT, "sync_precondition", e.to_string())
                }
                SyncError::Inconsistent(_) => {
                    tracing::error!("Inconsistent sync state: {}", e);
                    (StatusCode::CONFLICT, "inconsistent_state", e.to_string())
                }
                SyncError::Task(_) => {
                    tracing::error!("Sync task error: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        "An internal error occurred".to_string(),
                    )
                }
                SyncError::Remote(e) => remote_status(e),
                SyncError::Store(e) => store_status(e),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = self.parts();

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
