pub mod errors;
pub mod ids;
pub mod provider;

pub use errors::GatewayError;
pub use provider::{Completion, CompletionOptions, ModelProvider};
