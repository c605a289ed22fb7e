use thiserror::Error;

use crate::types::DType;

#[derive(Error, Debug)]
pub enum LumenError {
    /// Malformed or out-of-range request fields. The session ends before any
    /// update is sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A conditioner, noise oracle, scheduler, or decoder failed.
    #[error("Oracle failure: {0}")]
    Oracle(String),

    /// Writing an update to the client failed.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The session ran past its deadline.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Model config error: {0}")]
    ModelConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported dtype: {0:?}")]
    UnsupportedDtype(DType),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Image encoding error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LumenError>;
