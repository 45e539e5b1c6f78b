//! External collaborators of a poll cycle, bundled so tests can swap in fakes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use driftwatch_core::{GatewayError, ModelProvider};
use driftwatch_embeddings::EmbeddingService;
use driftwatch_llm::{
    build_analyst, build_embeddings, build_providers, build_search, FactExtractor,
    LlmFactExtractor, PolledModel, SearchGrounding,
};
use driftwatch_settings::{ApiKeys, DriftwatchSettings};
use tracing::{info, warn};

use crate::error::EngineError;

#[derive(Clone)]
pub struct Services {
    /// Models queried on every cycle.
    pub providers: Vec<PolledModel>,
    /// Secondary model for ghost-pivot explanations.
    pub analyst: Arc<dyn ModelProvider>,
    pub embeddings: Arc<dyn EmbeddingService>,
    pub facts: Arc<dyn FactExtractor>,
    /// Absent when no search key is configured.
    pub search: Option<Arc<dyn SearchGrounding>>,
}

impl Services {
    /// Wire live clients. The analysis model and embeddings are required;
    /// search grounding is optional.
    pub fn from_settings(
        settings: &DriftwatchSettings,
        keys: &ApiKeys,
    ) -> Result<Self, EngineError> {
        let providers = build_providers(settings, keys);
        if providers.is_empty() {
            warn!("no polled providers configured, cycles will record no snapshots");
        }
        let analyst = build_analyst(settings, keys).ok_or_else(|| {
            GatewayError::NotConfigured(format!(
                "API key for analysis provider {}",
                settings.analysis.provider
            ))
        })?;
        let embeddings = build_embeddings(settings, keys)
            .ok_or_else(|| GatewayError::NotConfigured("OPENAI_API_KEY".into()))?;
        let facts: Arc<dyn FactExtractor> = Arc::new(LlmFactExtractor::new(
            analyst.clone(),
            settings.analysis.key_fact_max_output_tokens,
        ));
        let search = build_search(settings, keys);
        info!(
            providers = providers.len(),
            analyst = %analyst.model(),
            search = search.is_some(),
            "services configured"
        );
        Ok(Self {
            providers,
            analyst,
            embeddings,
            facts,
            search,
        })
    }
}

/// Knobs for one orchestration.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub provider_timeout: Duration,
    /// Budget for every other external call: search, extraction,
    /// embeddings, explanations.
    pub step_timeout: Duration,
    pub search_max_results: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(120),
            step_timeout: Duration::from_secs(60),
            search_max_results: 10,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &DriftwatchSettings) -> Self {
        Self {
            provider_timeout: Duration::from_secs(settings.polling.provider_timeout_secs),
            step_timeout: Duration::from_secs(settings.polling.step_timeout_secs),
            search_max_results: settings.search.max_results,
        }
    }
}

/// Await `fut` for at most `budget`. Running out surfaces as
/// [`GatewayError::Timeout`].
pub(crate) async fn bounded<T, E>(
    budget: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, EngineError>
where
    EngineError: From<E>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result.map_err(EngineError::from),
        Err(_) => Err(GatewayError::Timeout(budget).into()),
    }
}
