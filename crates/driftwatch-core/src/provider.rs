use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

/// Options controlling a single completion request.
#[derive(Clone, Debug, Default)]
pub struct CompletionOptions {
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl CompletionOptions {
    pub fn with_max_output_tokens(max_output_tokens: u32) -> Self {
        Self {
            max_output_tokens: Some(max_output_tokens),
            ..Self::default()
        }
    }
}

/// Generated text plus the provider-reported token usage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub token_usage: Option<u32>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            token_usage: None,
        }
    }
}

/// A text-generation backend (Anthropic, OpenAI, xAI, Google).
///
/// Implementations must be safe to call concurrently; errors are local to the
/// provider that raised them.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider family, e.g. `"anthropic"`.
    fn name(&self) -> &str;

    /// Model identifier, e.g. `"gpt-4o"`. Snapshots are keyed by this.
    fn model(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_options_defaults() {
        let opts = CompletionOptions::default();
        assert!(opts.max_output_tokens.is_none());
        assert!(opts.temperature.is_none());
    }

    #[test]
    fn with_max_output_tokens() {
        let opts = CompletionOptions::with_max_output_tokens(2000);
        assert_eq!(opts.max_output_tokens, Some(2000));
    }

    #[test]
    fn completion_text_has_no_usage() {
        let c = Completion::text("hello");
        assert_eq!(c.text, "hello");
        assert!(c.token_usage.is_none());
    }
}
