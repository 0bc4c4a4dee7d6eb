use std::time::Duration;
use thiserror::Error;

use crate::config_manager::ConfigError;

/// Rejected caller input. Raised before the pipeline starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Query must not be empty")]
    Empty,

    #[error("Query is too long: {len} characters (max {max})")]
    TooLong { len: usize, max: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("Vector index unavailable: {0}")]
    Unavailable(String),

    #[error("Vector index query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Embedding model mismatch: index built with '{expected}', query embedder is '{actual}'")]
    EmbeddingModelMismatch { expected: String, actual: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),
}

impl RetrievalError {
    /// Whether a retry has any chance of succeeding.
    ///
    /// Model and dimension mismatches are configuration faults and fail fast.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RetrievalError::Unavailable(_) | RetrievalError::Timeout(_) | RetrievalError::Embedding(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// Network failure, timeout, 5xx or rate limiting.
    Retryable,
    /// Invalid request, authentication failure or other 4xx.
    NonRetryable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?} generation error: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: GenerationErrorKind::Retryable,
            message: message.into(),
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            kind: GenerationErrorKind::NonRetryable,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::retryable(format!("request timed out after {:?}", after))
    }

    /// Classify an HTTP status returned by a model endpoint.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("provider returned HTTP {}: {}", status, body);
        if status >= 500 || status == 429 || status == 408 {
            Self::retryable(message)
        } else {
            Self::non_retryable(message)
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == GenerationErrorKind::Retryable
    }
}

#[derive(Error, Debug)]
pub enum FundRagError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Invalid index snapshot: {0}")]
    InvalidSnapshot(String),
}

pub type Result<T> = std::result::Result<T, FundRagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(GenerationError::from_status(503, "overloaded").is_retryable());
        assert!(GenerationError::from_status(429, "slow down").is_retryable());
        assert!(!GenerationError::from_status(400, "bad request").is_retryable());
        assert!(!GenerationError::from_status(401, "bad key").is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = GenerationError::timeout(Duration::from_secs(30));
        assert_eq!(err.kind, GenerationErrorKind::Retryable);
        assert!(err.message.contains("30s"));
    }

    #[test]
    fn test_mismatch_is_not_transient() {
        let err = RetrievalError::EmbeddingModelMismatch {
            expected: "all-MiniLM-L6-v2".into(),
            actual: "nomic-embed-text".into(),
        };
        assert!(!err.is_transient());
        assert!(RetrievalError::Unavailable("down".into()).is_transient());
        assert!(RetrievalError::Timeout(Duration::from_millis(10)).is_transient());
    }
}
