use thiserror::Error;

/// One variant per error kind in the error-handling design table. Transport
/// and coordination errors are recovered locally by their originating
/// module (retry, reconnect, drop-and-log); only the semantic ones are
/// meant to reach an HTTP caller, via `sentryflow-server`'s `AppError`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("authentication with controller failed: {0}")]
    AuthenticationFailure(String),

    #[error("controller unavailable: {0}")]
    ControllerUnavailable(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("storage lock exhausted retries: {0}")]
    TransientStorageLockExhausted(String),

    #[error("model error: {0}")]
    ModelError(String),

    #[error("policy synthesis failed: {0}")]
    PolicySynthesisFailure(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
