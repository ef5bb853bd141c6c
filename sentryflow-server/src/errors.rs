//! HTTP-facing error type. Every handler returns `Result<T, AppError>`;
//! `AppError` knows how to turn itself into a JSON response and how to
//! absorb every error kind in the error-handling design table (§7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use sentryflow_core::CoreError;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED, message)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": { "message": self.message, "status": self.status.as_u16() } }));
        (self.status, body).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailure(msg) => AppError::new(StatusCode::UNAUTHORIZED, msg),
            CoreError::ControllerUnavailable(msg) => AppError::new(StatusCode::BAD_GATEWAY, msg),
            CoreError::ValidationError(msg) => AppError::bad_request(msg),
            CoreError::NotFound(msg) => AppError::not_found(msg),
            CoreError::Forbidden(msg) => AppError::forbidden(msg),
            CoreError::Conflict(msg) => AppError::conflict(msg),
            CoreError::Storage(err) => {
                tracing::error!(error = ?err, "storage operation failed");
                AppError::internal("database operation failed")
            }
            CoreError::TransientStorageLockExhausted(msg) => {
                tracing::error!(%msg, "storage retry budget exhausted");
                AppError::internal("database operation failed")
            }
            CoreError::ModelError(msg) => {
                tracing::error!(%msg, "model error");
                AppError::internal("model evaluation failed")
            }
            CoreError::PolicySynthesisFailure(msg) => AppError::internal(msg),
            CoreError::Transport(err) => {
                tracing::error!(error = ?err, "upstream transport error");
                AppError::new(StatusCode::BAD_GATEWAY, "controller request failed")
            }
            CoreError::Serde(err) => AppError::bad_request(err.to_string()),
            CoreError::Internal(msg) => AppError::internal(msg),
        }
    }
}
