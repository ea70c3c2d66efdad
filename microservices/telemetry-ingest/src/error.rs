//! Error types for the ingest service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use riverwatch_core::RiverwatchError;
use serde_json::json;
use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Ingest service error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Store operation timed out after {0:?}")]
    StoreTimeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unit not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Core(#[from] RiverwatchError),
}

impl Error {
    /// Failures that degrade ingest instead of surfacing to a caller
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Store(_) | Error::StoreTimeout(_) | Error::Transport(_))
    }
}

impl From<riverwatch_db::DbError> for Error {
    fn from(err: riverwatch_db::DbError) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Error::Store(_) | Error::StoreTimeout(_) | Error::Transport(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            Error::Core(inner) => {
                let status = StatusCode::from_u16(inner.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if status.is_server_error() {
                    tracing::error!("Internal error: {:?}", inner);
                }
                (status, inner.to_string())
            }
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
