//! Application error type.
//!
//! Every handler returns `AppResult<T>`; `AppError` knows its HTTP status and
//! renders the standard error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::db::migrations::MigrationError;
use crate::middleware::request_id::RequestId;
use crate::response::ApiResponse;

/// Result alias used across the service.
pub type AppResult<T> = Result<T, AppError>;

/// Errors surfaced by the Todo service and its configuration layer.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration is missing or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Request input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Requested todo does not exist.
    #[error("todo '{0}' not found")]
    TodoNotFound(String),

    /// Could not reach the database.
    #[error("database connection failed: {0}")]
    DatabaseConnection(String),

    /// A statement failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(String),

    /// Schema migration failed.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::TodoNotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseConnection(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_)
            | AppError::DatabaseQuery(_)
            | AppError::Migration(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::TodoNotFound(_) => "TODO_NOT_FOUND",
            AppError::DatabaseConnection(_) => "DATABASE_UNAVAILABLE",
            AppError::DatabaseQuery(_) => "DATABASE_ERROR",
            AppError::Migration(_) => "MIGRATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::DatabaseConnection(error.to_string())
            }
            other => AppError::DatabaseQuery(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }

        // Internal details stay in the log.
        let message = match &self {
            AppError::DatabaseQuery(_) | AppError::Internal(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = ApiResponse::err(self.code(), message);
        if let Some(request_id) = RequestId::current() {
            body = body.with_request_id(request_id.as_str());
        }
        (status, Json(body)).into_response()
    }
}
