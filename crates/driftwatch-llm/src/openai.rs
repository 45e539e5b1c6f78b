use async_trait::async_trait;
use driftwatch_core::{Completion, CompletionOptions, GatewayError, ModelProvider};
use driftwatch_settings::ProviderKind;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::http;
use crate::models;

/// Chat Completions client shared by OpenAI and xAI.
pub struct OpenAiCompatProvider {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    family: ProviderKind,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

impl OpenAiCompatProvider {
    pub fn openai(api_key: SecretString, model: &str) -> Self {
        Self::new(ProviderKind::Openai, api_key, model)
    }

    pub fn xai(api_key: SecretString, model: &str) -> Self {
        Self::new(ProviderKind::Xai, api_key, model)
    }

    fn new(family: ProviderKind, api_key: SecretString, model: &str) -> Self {
        Self {
            client: http::client(),
            api_key,
            model: model.to_string(),
            base_url: models::default_base_url(family).to_string(),
            family,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.family.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(
        skip(self, prompt, options),
        fields(provider = %self.family, model_id = %self.model)
    )]
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, GatewayError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: options
                .max_output_tokens
                .map(|n| models::clamp_output_tokens(&self.model, n)),
            temperature: options.temperature,
        };

        let req = self
            .client
            .post(http::join(&self.base_url, "/v1/chat/completions"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body);
        let resp: ChatResponse = http::send_json(req).await?;

        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::MalformedResponse("no choices in response".into()))?;

        Ok(Completion {
            text,
            token_usage: resp.usage.map(|u| u.total_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn openai_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o",
                "max_tokens": 2000,
                "messages": [{"role": "user", "content": "brief me"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Summary."}}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
            })))
            .mount(&server)
            .await;

        let provider = OpenAiCompatProvider::openai(SecretString::from("sk-test"), "gpt-4o")
            .with_base_url(server.uri());
        assert_eq!(provider.name(), "openai");

        let out = provider
            .complete("brief me", &CompletionOptions::with_max_output_tokens(2000))
            .await
            .unwrap();
        assert_eq!(out.text, "Summary.");
        assert_eq!(out.token_usage, Some(7));
    }

    #[tokio::test]
    async fn xai_uses_same_wire_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "Grok says."}}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiCompatProvider::xai(SecretString::from("xai-test"), "grok-3")
            .with_base_url(server.uri());
        assert_eq!(provider.name(), "xai");
        let out = provider
            .complete("q", &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(out.text, "Grok says.");
        assert!(out.token_usage.is_none());
    }

    #[tokio::test]
    async fn missing_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": []
            })))
            .mount(&server)
            .await;

        let provider = OpenAiCompatProvider::openai(SecretString::from("k"), "gpt-4o")
            .with_base_url(server.uri());
        let err = provider
            .complete("q", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn bad_key_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let provider = OpenAiCompatProvider::openai(SecretString::from("k"), "gpt-4o")
            .with_base_url(server.uri());
        let err = provider
            .complete("q", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::AuthenticationFailed(body) if body.contains("invalid")
        ));
    }
}
