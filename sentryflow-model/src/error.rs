use thiserror::Error;

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid flow: {0}")]
    InvalidFlow(String),
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
