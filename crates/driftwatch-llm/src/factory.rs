//! Build live clients from settings and environment secrets.

use std::sync::Arc;

use driftwatch_core::ModelProvider;
use driftwatch_embeddings::{EmbeddingService, OpenAiEmbeddingService};
use driftwatch_settings::{ApiKeys, DriftwatchSettings, ProviderKind};
use secrecy::SecretString;
use tracing::{info, warn};

use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::grounding::{SearchGrounding, TavilySearch};
use crate::models;
use crate::openai::OpenAiCompatProvider;
use crate::reliable::ReliableProvider;

fn provider_for(
    kind: ProviderKind,
    key: SecretString,
    model: &str,
    base_url: Option<&str>,
) -> Arc<dyn ModelProvider> {
    match kind {
        ProviderKind::Anthropic => {
            let mut p = AnthropicProvider::new(key, model);
            if let Some(url) = base_url {
                p = p.with_base_url(url);
            }
            Arc::new(ReliableProvider::with_defaults(p))
        }
        ProviderKind::Openai | ProviderKind::Xai => {
            let mut p = if kind == ProviderKind::Xai {
                OpenAiCompatProvider::xai(key, model)
            } else {
                OpenAiCompatProvider::openai(key, model)
            };
            if let Some(url) = base_url {
                p = p.with_base_url(url);
            }
            Arc::new(ReliableProvider::with_defaults(p))
        }
        ProviderKind::Google => {
            let mut p = GoogleProvider::new(key, model);
            if let Some(url) = base_url {
                p = p.with_base_url(url);
            }
            Arc::new(ReliableProvider::with_defaults(p))
        }
    }
}

/// A polled model and its per-call output budget.
#[derive(Clone)]
pub struct PolledModel {
    pub provider: Arc<dyn ModelProvider>,
    pub max_output_tokens: u32,
}

impl PolledModel {
    pub fn new(provider: Arc<dyn ModelProvider>, max_output_tokens: u32) -> Self {
        Self {
            provider,
            max_output_tokens,
        }
    }
}

/// The polled models. Disabled entries and entries without a key are skipped.
pub fn build_providers(settings: &DriftwatchSettings, keys: &ApiKeys) -> Vec<PolledModel> {
    let mut providers = Vec::new();
    for entry in settings.providers.iter().filter(|p| p.enabled) {
        let Some(key) = keys.for_provider(entry.provider) else {
            warn!(
                provider = %entry.provider,
                model_id = %entry.model,
                "no API key configured, skipping provider"
            );
            continue;
        };
        if models::find_model(&entry.model).is_none() {
            info!(model_id = %entry.model, "model not in catalog, using it as-is");
        }
        providers.push(PolledModel::new(
            provider_for(entry.provider, key.clone(), &entry.model, entry.base_url.as_deref()),
            models::clamp_output_tokens(&entry.model, entry.max_output_tokens),
        ));
    }
    providers
}

/// Secondary model for fact extraction and ghost-pivot explanations.
pub fn build_analyst(
    settings: &DriftwatchSettings,
    keys: &ApiKeys,
) -> Option<Arc<dyn ModelProvider>> {
    let analysis = &settings.analysis;
    let Some(key) = keys.for_provider(analysis.provider) else {
        warn!(provider = %analysis.provider, "no API key for analysis model");
        return None;
    };
    Some(provider_for(analysis.provider, key.clone(), &analysis.model, None))
}

pub fn build_embeddings(
    settings: &DriftwatchSettings,
    keys: &ApiKeys,
) -> Option<Arc<dyn EmbeddingService>> {
    let Some(key) = keys.openai.clone() else {
        warn!("OPENAI_API_KEY missing, embeddings unavailable");
        return None;
    };
    let cfg = &settings.embeddings;
    let mut service = OpenAiEmbeddingService::new(key, &cfg.model, cfg.dimensions);
    if let Some(url) = &cfg.base_url {
        service = service.with_base_url(url.clone());
    }
    Some(Arc::new(service))
}

/// Search grounding is optional; absent without `TAVILY_API_KEY`.
pub fn build_search(
    settings: &DriftwatchSettings,
    keys: &ApiKeys,
) -> Option<Arc<dyn SearchGrounding>> {
    let key = keys.tavily.clone()?;
    let mut search = TavilySearch::new(key, &settings.search.search_depth);
    if let Some(url) = &settings.search.base_url {
        search = search.with_base_url(url.clone());
    }
    Some(Arc::new(search))
}
