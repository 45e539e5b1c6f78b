//! Claim extraction via a secondary model.

use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use driftwatch_core::{CompletionOptions, GatewayError, ModelProvider};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One factual claim pulled out of a model response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractedClaim {
    pub claim: String,
    pub confidence: Option<f64>,
}

#[async_trait]
pub trait FactExtractor: Send + Sync {
    /// Individual claims with a confidence in [0, 1]. Malformed upstream
    /// output yields an empty list rather than an error.
    async fn extract_claims(&self, text: &str) -> Result<Vec<ExtractedClaim>, GatewayError>;

    /// The 2-4 most important facts of a grounding document, one per line.
    async fn extract_key_facts(&self, content: &str) -> Result<Vec<String>, GatewayError>;
}

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```(?:json)?\n?").unwrap());

fn claims_prompt(text: &str) -> String {
    format!(
        "Extract individual factual claims from the following text. Return a JSON array where each item has \"claim\" (a single sentence stating one fact) and \"confidence\" (0.0-1.0, how definitively the text states this).\n\
         \n\
         Only extract concrete, verifiable claims. Skip opinions, speculation, and analysis.\n\
         \n\
         Text:\n\
         {text}\n\
         \n\
         Return ONLY valid JSON array, no markdown code blocks:"
    )
}

fn key_facts_prompt(content: &str) -> String {
    format!(
        "Extract the 2-4 most important factual claims from this text. Return each fact on its own line, with no numbering or bullets. Be concise, one sentence per fact.\n\
         \n\
         Text:\n\
         {content}"
    )
}

/// Parse a JSON claim array, tolerating markdown fences and stray items.
pub fn parse_claims(raw: &str) -> Vec<ExtractedClaim> {
    let cleaned = CODE_FENCE.replace_all(raw, "");
    let cleaned = cleaned.trim();

    let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(cleaned)
    else {
        debug!(len = raw.len(), "claim output was not a JSON array");
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| {
            let claim = item.get("claim")?.as_str()?.trim().to_string();
            if claim.is_empty() {
                return None;
            }
            let confidence = item
                .get("confidence")
                .and_then(serde_json::Value::as_f64)
                .map(|c| c.clamp(0.0, 1.0));
            Some(ExtractedClaim { claim, confidence })
        })
        .collect()
}

/// Split a line-per-fact answer, dropping blanks.
pub fn parse_key_facts(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// [`FactExtractor`] backed by the analysis model.
pub struct LlmFactExtractor {
    analyst: Arc<dyn ModelProvider>,
    key_fact_max_output_tokens: u32,
}

impl LlmFactExtractor {
    pub fn new(analyst: Arc<dyn ModelProvider>, key_fact_max_output_tokens: u32) -> Self {
        Self {
            analyst,
            key_fact_max_output_tokens,
        }
    }
}

#[async_trait]
impl FactExtractor for LlmFactExtractor {
    async fn extract_claims(&self, text: &str) -> Result<Vec<ExtractedClaim>, GatewayError> {
        let completion = self
            .analyst
            .complete(&claims_prompt(text), &CompletionOptions::default())
            .await?;
        let claims = parse_claims(&completion.text);
        if claims.is_empty() {
            warn!(model_id = %self.analyst.model(), "fact extraction produced no claims");
        }
        Ok(claims)
    }

    async fn extract_key_facts(&self, content: &str) -> Result<Vec<String>, GatewayError> {
        let completion = self
            .analyst
            .complete(
                &key_facts_prompt(content),
                &CompletionOptions::with_max_output_tokens(self.key_fact_max_output_tokens),
            )
            .await?;
        Ok(parse_key_facts(&completion.text))
    }
}

/// Deterministic extractor for tests: every non-blank line is one claim
/// (confidence 0.9) and one key fact.
#[derive(Default)]
pub struct MockFactExtractor {
    fail: bool,
}

impl MockFactExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl FactExtractor for MockFactExtractor {
    async fn extract_claims(&self, text: &str) -> Result<Vec<ExtractedClaim>, GatewayError> {
        if self.fail {
            return Err(GatewayError::ProviderOverloaded);
        }
        Ok(parse_key_facts(text)
            .into_iter()
            .map(|claim| ExtractedClaim {
                claim,
                confidence: Some(0.9),
            })
            .collect())
    }

    async fn extract_key_facts(&self, content: &str) -> Result<Vec<String>, GatewayError> {
        if self.fail {
            return Err(GatewayError::ProviderOverloaded);
        }
        Ok(parse_key_facts(content))
    }
}
