//! Error types for elect-loader
//!
//! `ImportError` classifies everything that can go wrong during an import
//! run; `ApiError` is what the HTTP handlers return.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Failure of the low-level delimited cursor
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Field index beyond the physical length of the current row
    #[error("Index {index} of row #{row} is out of range (row has {len} fields)")]
    OutOfRange { index: usize, row: usize, len: usize },

    /// Field access before the first successful advance
    #[error("No current row data")]
    InvalidState,

    #[error("Delimited input error: {0}")]
    Csv(#[from] csv::Error),
}

/// Failure of a single attachment transfer
#[derive(Debug, Error)]
pub enum FetchError {
    /// Cancellation token fired before the transfer finished
    #[error("Download cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server responded with status {0}")]
    Status(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None => FetchError::Transport(err.to_string()),
        }
    }
}

/// Which kind of entity an unknown-entity decision was about
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Region,
    Commission,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Region => write!(f, "region"),
            EntityKind::Commission => write!(f, "commission"),
        }
    }
}

/// Import run error taxonomy
#[derive(Debug, Error)]
pub enum ImportError {
    /// A source row could not be turned into a protocol record
    #[error("Malformed record at row #{row}: {message}")]
    MalformedRecord { row: usize, message: String },

    /// Region or commission absent from the store under the Stop policy
    #[error("Unknown {kind} '{name}', import stopped")]
    UnknownEntity { kind: EntityKind, name: String },

    /// Non-cancellation transfer failure of one attachment
    #[error("Failed to fetch {uri}: {message}")]
    AttachmentFetch { uri: String, message: String },

    /// Run cancelled by the operator
    #[error("Import cancelled")]
    Cancelled,

    #[error("Persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Unhandled(#[from] anyhow::Error),
}

impl ImportError {
    pub fn malformed(row: usize, message: impl Into<String>) -> Self {
        ImportError::MalformedRecord {
            row,
            message: message.into(),
        }
    }

    /// True when the error only signals an operator cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ImportError::Cancelled)
    }
}

impl From<elect_common::Error> for ImportError {
    fn from(err: elect_common::Error) -> Self {
        match err {
            elect_common::Error::Database(e) => ImportError::Persistence(e),
            elect_common::Error::Io(e) => ImportError::Io(e),
            other => ImportError::Unhandled(anyhow::anyhow!(other)),
        }
    }
}

/// Why an import run could not be started
#[derive(Debug, Error)]
pub enum StartError {
    #[error("Import session {0} already running")]
    AlreadyRunning(Uuid),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error(transparent)]
    Persistence(#[from] elect_common::Error),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. an import already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error("Common error: {0}")]
    Common(#[from] elect_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Database(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                err.to_string(),
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<StartError> for ApiError {
    fn from(err: StartError) -> Self {
        match err {
            StartError::AlreadyRunning(_) => ApiError::Conflict(err.to_string()),
            StartError::InvalidSource(msg) => ApiError::BadRequest(msg),
            StartError::Persistence(e) => ApiError::Common(e),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
