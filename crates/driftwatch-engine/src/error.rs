use driftwatch_core::ids::EventId;
use driftwatch_core::GatewayError;
use driftwatch_embeddings::EmbeddingError;
use driftwatch_store::StoreError;

/// Failure of a whole poll-cycle orchestration. Individual provider
/// failures never surface here; they are recorded in the report.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

impl EngineError {
    /// Whether the dispatcher should rerun the orchestration.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EventNotFound(_) => false,
            Self::Store(StoreError::CorruptRow { .. }) => false,
            Self::Gateway(e) => !e.is_fatal(),
            Self::Embedding(e) => e.is_retryable(),
            Self::Store(_) => true,
        }
    }
}

/// Why a work item could not be submitted.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("event not found: {0}")]
    NotFound(EventId),

    #[error("event {0} already has a poll cycle in flight")]
    AlreadyRunning(EventId),

    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error("poll cycle failed: {0}")]
    Failed(#[from] EngineError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
