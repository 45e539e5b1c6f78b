//! Text embeddings and vector similarity.

pub mod errors;
pub mod normalize;
pub mod openai;
pub mod service;

pub use errors::{EmbeddingError, Result};
pub use normalize::{cosine_similarity, l2_norm, l2_normalize};
pub use openai::OpenAiEmbeddingService;
pub use service::{EmbeddingService, MockEmbeddingService};
