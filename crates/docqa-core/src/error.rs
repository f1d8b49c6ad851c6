use std::time::Duration;

use thiserror::Error;

use crate::types::QueryMatch;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Generation failed after retries. `retrieved` is the context the
    /// answer would have been grounded on, in rank order.
    #[error("Generation failed: {source}")]
    Generation {
        #[source]
        source: GenerationError,
        retrieved: Vec<QueryMatch>,
    },

    #[error("Document error: {0}")]
    Document(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("write conflict: {0}")]
    WriteConflict(String),

    #[error("malformed chunk {id}: {reason}")]
    MalformedChunk { id: String, reason: String },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding failed: {0}")]
    Embedding(String),
}

impl IndexError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// Worth one more attempt: timeouts, connection failures, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Backend { status, .. } => *status == 429 || *status >= 500,
            Self::Auth(_) | Self::Malformed(_) => false,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth(message),
            _ => Self::Backend { status, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
