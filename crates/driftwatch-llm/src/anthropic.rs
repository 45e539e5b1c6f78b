use async_trait::async_trait;
use driftwatch_core::{Completion, CompletionOptions, GatewayError, ModelProvider};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::http;
use crate::models;
use driftwatch_settings::ProviderKind;

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Anthropic Messages API, single-turn, non-streaming.
pub struct AnthropicProvider {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [UserMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString, model: &str) -> Self {
        Self {
            client: http::client(),
            api_key,
            model: model.to_string(),
            base_url: models::default_base_url(ProviderKind::Anthropic).to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, prompt, options), fields(model_id = %self.model))]
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, GatewayError> {
        let max_tokens = models::clamp_output_tokens(
            &self.model,
            options.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        );
        let body = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: [UserMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
        };

        let req = self
            .client
            .post(http::join(&self.base_url, "/v1/messages"))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body);
        let resp: MessagesResponse = http::send_json(req).await?;

        let text: String = resp
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect();
        if text.is_empty() {
            return Err(GatewayError::MalformedResponse(
                "no text content in response".into(),
            ));
        }

        Ok(Completion {
            text,
            token_usage: resp.usage.map(|u| u.input_tokens + u.output_tokens),
        })
    }
}
