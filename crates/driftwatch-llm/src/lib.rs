//! Model query, fact extraction and search grounding clients.

pub mod anthropic;
pub mod facts;
pub mod factory;
pub mod google;
pub mod grounding;
mod http;
pub mod mock;
pub mod models;
pub mod openai;
pub mod reliable;

pub use anthropic::AnthropicProvider;
pub use facts::{ExtractedClaim, FactExtractor, LlmFactExtractor, MockFactExtractor};
pub use factory::{build_analyst, build_embeddings, build_providers, build_search, PolledModel};
pub use google::GoogleProvider;
pub use grounding::{MockSearch, SearchGrounding, SearchHit, TavilySearch};
pub use mock::{MockProvider, MockResponse};
pub use openai::OpenAiCompatProvider;
pub use reliable::{ReliableConfig, ReliableProvider};
