//! Embedding error types.

use driftwatch_core::GatewayError;
use thiserror::Error;

/// Errors from embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The embedding API call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The service returned a vector of unexpected length.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The service returned a different number of vectors than inputs.
    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// Service not ready (missing credentials or disabled).
    #[error("embedding service not ready")]
    NotReady,
}

impl EmbeddingError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway(e) if e.is_retryable())
    }
}

/// Result alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_variants() {
        assert_eq!(
            EmbeddingError::DimensionMismatch {
                expected: 1536,
                actual: 3
            }
            .to_string(),
            "dimension mismatch: expected 1536, got 3"
        );
        assert_eq!(EmbeddingError::NotReady.to_string(), "embedding service not ready");
    }

    #[test]
    fn gateway_errors_pass_through() {
        let err: EmbeddingError = GatewayError::ProviderOverloaded.into();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "provider overloaded");

        let fatal: EmbeddingError = GatewayError::AuthenticationFailed("bad key".into()).into();
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EmbeddingError>();
    }
}
