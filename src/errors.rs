use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::io;
use thiserror::Error;

/// Every failure the service can report, grouped by how a client should react.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad, missing or expired signature, or an unknown access key.
    #[error("{0}")]
    Authentication(String),
    /// ACL or ownership denial for an authenticated caller.
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    NotFound(String),
    /// Malformed names, bad durations, missing parameters.
    #[error("{0}")]
    Validation(String),
    /// Duplicate bucket name, duplicate non-versioned file, non-empty bucket.
    #[error("{0}")]
    Conflict(String),
    /// Client exceeded its request window.
    #[error("rate limit exceeded")]
    RateLimited { retry_after: u64 },
    /// Storage, disk or database failure. The detail is logged, not returned.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether re-running the same job could plausibly succeed.
    ///
    /// Only storage failures are worth another attempt; a missing bucket or a
    /// denied operation will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Internal(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed with internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        if let AppError::RateLimited { retry_after } = self {
            let body = Json(json!({
                "error": message,
                "status": status.as_u16(),
                "retry_after": retry_after
            }));
            return (status, [(header::RETRY_AFTER, retry_after.to_string())], body).into_response();
        }

        let body = Json(json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(format!("database: {err}"))
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("io: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("json: {err}"))
    }
}

/// Return true if the SQLx error is a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
