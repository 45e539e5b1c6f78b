//! One poll cycle for one event: freeze evidence, fan out to every model,
//! then derive drift, memory-hole and context-rejection signals.

use std::sync::Arc;

use chrono::Utc;
use driftwatch_core::ids::{EventId, PollCycleId, SnapshotId, SourceId};
use driftwatch_core::{CompletionOptions, GatewayError};
use driftwatch_llm::PolledModel;
use driftwatch_store::{
    Database, EventRepo, EventRow, FactRepo, NewFactNode, NewSearchResult, NewSnapshot,
    PollCycleRepo, PollCycleRow, SearchResultRepo, SearchResultRow, SnapshotRepo, SnapshotRow,
    SourceRepo, SourceRow, StoreError,
};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::analysis::{ContextRejectionDetector, DriftAnalyzer, MemoryHoleDetector};
use crate::error::EngineError;
use crate::prompt::build_poll_prompt;
use crate::services::{bounded, OrchestratorConfig, Services};

/// Outcome of one provider query within a cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderStatus {
    Fulfilled { snapshot_id: SnapshotId },
    Rejected { error: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct ProviderOutcome {
    pub model_id: String,
    pub provider: String,
    #[serde(flatten)]
    pub status: ProviderStatus,
}

impl ProviderOutcome {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self.status, ProviderStatus::Fulfilled { .. })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PollReport {
    pub event_id: EventId,
    pub poll_cycle_id: PollCycleId,
    pub search_results: usize,
    pub results: Vec<ProviderOutcome>,
}

impl PollReport {
    pub fn fulfilled(&self) -> usize {
        self.results.iter().filter(|r| r.is_fulfilled()).count()
    }
}

/// A one-off answer from a chosen subset of sources, next to the same
/// model's latest recorded snapshot. Nothing is persisted.
#[derive(Clone, Debug, Serialize)]
pub struct Synthesis {
    pub synthesized_text: String,
    pub latest_snapshot_text: Option<String>,
    pub model_id: String,
    pub sources_used: usize,
}

/// State shared by every provider pipeline of one cycle.
struct CycleContext<'a> {
    event: &'a EventRow,
    cycle: &'a PollCycleRow,
    previous_sources: &'a [SourceId],
    search_results: &'a [SearchResultRow],
    prompt: &'a str,
}

pub struct PollOrchestrator {
    db: Database,
    services: Arc<Services>,
    config: OrchestratorConfig,
}

impl PollOrchestrator {
    pub fn new(db: Database, services: Arc<Services>, config: OrchestratorConfig) -> Self {
        Self {
            db,
            services,
            config,
        }
    }

    /// Run a full cycle. Errors here are orchestration failures; individual
    /// provider failures are reported in the returned [`PollReport`].
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn run(&self, event_id: &EventId) -> Result<PollReport, EngineError> {
        let event = EventRepo::new(self.db.clone())
            .find(event_id)?
            .ok_or_else(|| EngineError::EventNotFound(event_id.clone()))?;

        let sources = SourceRepo::new(self.db.clone()).active_for(event_id)?;
        let frozen: Vec<SourceId> = sources.iter().map(|s| s.id.clone()).collect();
        let cycles = PollCycleRepo::new(self.db.clone());
        let cycle = cycles.create(event_id, &frozen)?;
        info!(
            poll_cycle_id = %cycle.id,
            step = "create-poll-cycle",
            sources = frozen.len(),
            "poll cycle started"
        );

        match self.run_cycle(&event, &sources, &cycle).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(poll_cycle_id = %cycle.id, error = %e, "poll cycle failed");
                if let Err(fail_err) = cycles.fail(&cycle.id) {
                    warn!(
                        poll_cycle_id = %cycle.id,
                        error = %fail_err,
                        "could not mark cycle failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_cycle(
        &self,
        event: &EventRow,
        sources: &[SourceRow],
        cycle: &PollCycleRow,
    ) -> Result<PollReport, EngineError> {
        let cycles = PollCycleRepo::new(self.db.clone());
        let previous_sources = cycles
            .previous_completed(cycle)?
            .map(|c| c.frozen_source_ids)
            .unwrap_or_default();
        debug!(
            poll_cycle_id = %cycle.id,
            step = "get-previous-sources",
            previous = previous_sources.len()
        );

        let search_results = self.ground(event, cycle).await?;
        let prompt = build_poll_prompt(&event.prompt_template, sources, &search_results);

        let ctx = CycleContext {
            event,
            cycle,
            previous_sources: &previous_sources,
            search_results: &search_results,
            prompt: &prompt,
        };
        let results = join_all(
            self.services
                .providers
                .iter()
                .map(|model| self.run_provider(&ctx, model)),
        )
        .await;

        match cycles.complete(&cycle.id) {
            Ok(()) => {}
            Err(StoreError::Conflict(reason)) => warn!(
                poll_cycle_id = %cycle.id,
                step = "complete-poll-cycle",
                reason = %reason,
                "cycle was finished elsewhere, keeping its status"
            ),
            Err(e) => return Err(e.into()),
        }
        EventRepo::new(self.db.clone()).mark_polled(&event.id, Utc::now())?;

        let report = PollReport {
            event_id: event.id.clone(),
            poll_cycle_id: cycle.id.clone(),
            search_results: search_results.len(),
            results,
        };
        info!(
            poll_cycle_id = %cycle.id,
            step = "complete-poll-cycle",
            fulfilled = report.fulfilled(),
            total = report.results.len(),
            "poll cycle completed"
        );
        Ok(report)
    }

    /// Search grounding. A failed search yields no results; a failed insert
    /// fails the cycle.
    async fn ground(
        &self,
        event: &EventRow,
        cycle: &PollCycleRow,
    ) -> Result<Vec<SearchResultRow>, EngineError> {
        let Some(search) = &self.services.search else {
            return Ok(Vec::new());
        };
        let query = event.grounding_query();
        let max = self.config.search_max_results;
        let hits = match bounded(self.config.step_timeout, search.search(query, max)).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(
                    poll_cycle_id = %cycle.id,
                    step = "search-grounding",
                    error = %e,
                    "search grounding failed, continuing without it"
                );
                return Ok(Vec::new());
            }
        };

        let repo = SearchResultRepo::new(self.db.clone());
        let mut rows = Vec::with_capacity(hits.len());
        for hit in hits {
            rows.push(repo.create(&NewSearchResult {
                poll_cycle_id: cycle.id.clone(),
                event_id: event.id.clone(),
                query: query.to_string(),
                title: hit.title,
                url: hit.url,
                content: hit.content,
                score: hit.score,
                published_date: hit.published_date,
            })?);
        }
        info!(
            poll_cycle_id = %cycle.id,
            step = "search-grounding",
            count = rows.len(),
            "grounding results stored"
        );
        Ok(rows)
    }

    #[instrument(skip_all, fields(
        event_id = %ctx.event.id,
        poll_cycle_id = %ctx.cycle.id,
        model_id = %model.provider.model()
    ))]
    async fn run_provider(&self, ctx: &CycleContext<'_>, model: &PolledModel) -> ProviderOutcome {
        let provider = &model.provider;
        let outcome = |status| ProviderOutcome {
            model_id: provider.model().to_string(),
            provider: provider.name().to_string(),
            status,
        };

        let options = CompletionOptions::with_max_output_tokens(model.max_output_tokens);
        let completion = match tokio::time::timeout(
            self.config.provider_timeout,
            provider.complete(ctx.prompt, &options),
        )
        .await
        {
            Ok(Ok(completion)) => completion,
            Ok(Err(e)) => {
                warn!(error = %e, kind = e.error_kind(), "provider query failed");
                return outcome(ProviderStatus::Rejected {
                    error: e.to_string(),
                });
            }
            Err(_) => {
                let e = GatewayError::Timeout(self.config.provider_timeout);
                warn!(error = %e, "provider query timed out");
                return outcome(ProviderStatus::Rejected {
                    error: e.to_string(),
                });
            }
        };

        let snapshot = match SnapshotRepo::new(self.db.clone()).create(&NewSnapshot {
            event_id: ctx.event.id.clone(),
            poll_cycle_id: ctx.cycle.id.clone(),
            model_id: provider.model().to_string(),
            provider: provider.name().to_string(),
            prompt_used: ctx.prompt.to_string(),
            response_text: completion.text,
            token_count: completion.token_usage,
        }) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "snapshot insert failed");
                return outcome(ProviderStatus::Rejected {
                    error: e.to_string(),
                });
            }
        };

        self.post_process(ctx, snapshot.clone()).await;
        outcome(ProviderStatus::Fulfilled {
            snapshot_id: snapshot.id,
        })
    }

    /// Each step is guarded on its own and bounded by the step budget; a
    /// failure is logged and the next step still runs.
    async fn post_process(&self, ctx: &CycleContext<'_>, mut snapshot: SnapshotRow) {
        let step_timeout = self.config.step_timeout;
        match self.embed_snapshot(&snapshot).await {
            Ok(embedding) => snapshot.embedding = Some(embedding),
            Err(e) => warn!(
                snapshot_id = %snapshot.id,
                step = "embed-snapshot",
                error = %e,
                "step failed"
            ),
        }

        if let Err(e) = self.store_facts(ctx, &snapshot).await {
            warn!(snapshot_id = %snapshot.id, step = "extract-facts", error = %e, "step failed");
        }

        let drift = DriftAnalyzer::new(self.db.clone(), self.services.analyst.clone())
            .with_explain_timeout(step_timeout);
        if let Err(e) = drift
            .analyze(
                ctx.event,
                &snapshot,
                &ctx.cycle.frozen_source_ids,
                ctx.previous_sources,
            )
            .await
        {
            warn!(snapshot_id = %snapshot.id, step = "compute-drift", error = %e, "step failed");
        }

        if let Err(e) = MemoryHoleDetector::new(self.db.clone()).detect(&ctx.event.id, &snapshot) {
            warn!(
                snapshot_id = %snapshot.id,
                step = "detect-memory-holes",
                error = %e,
                "step failed"
            );
        }

        if !ctx.search_results.is_empty() {
            let detector = ContextRejectionDetector::new(
                self.db.clone(),
                self.services.facts.clone(),
                self.services.embeddings.clone(),
            )
            .with_step_timeout(step_timeout);
            if let Err(e) = detector.detect(&snapshot, ctx.search_results).await {
                warn!(
                    snapshot_id = %snapshot.id,
                    step = "detect-context-rejection",
                    error = %e,
                    "step failed"
                );
            }
        }
    }

    async fn embed_snapshot(&self, snapshot: &SnapshotRow) -> Result<Vec<f32>, EngineError> {
        let embeddings = &self.services.embeddings;
        let embedding = bounded(
            self.config.step_timeout,
            embeddings.embed_single(&snapshot.response_text),
        )
        .await?;
        SnapshotRepo::new(self.db.clone()).set_embedding(&snapshot.id, &embedding)?;
        Ok(embedding)
    }

    /// Claims are embedded in one batch. Without embeddings they are still
    /// stored, just not comparable.
    async fn store_facts(
        &self,
        ctx: &CycleContext<'_>,
        snapshot: &SnapshotRow,
    ) -> Result<usize, EngineError> {
        let budget = self.config.step_timeout;
        let claims = bounded(budget, self.services.facts.extract_claims(&snapshot.response_text))
            .await?;
        if claims.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = claims.iter().map(|c| c.claim.clone()).collect();
        let embeddings = match bounded(budget, self.services.embeddings.embed(&texts)).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors.into_iter().map(Some).collect(),
            Ok(vectors) => {
                warn!(
                    expected = texts.len(),
                    actual = vectors.len(),
                    "claim embedding count mismatch"
                );
                vec![None; texts.len()]
            }
            Err(e) => {
                warn!(error = %e, "claim embedding failed, storing facts without vectors");
                vec![None; texts.len()]
            }
        };

        let repo = FactRepo::new(self.db.clone());
        for (claim, embedding) in claims.into_iter().zip(embeddings) {
            repo.create(&NewFactNode {
                snapshot_id: snapshot.id.clone(),
                event_id: ctx.event.id.clone(),
                claim: claim.claim,
                claim_embedding: embedding,
                confidence: claim.confidence,
            })?;
        }
        debug!(count = texts.len(), "facts stored");
        Ok(texts.len())
    }

    /// Ask one polled model about the event using only `source_ids` (the
    /// active sources when `None`). `model_id` falls back to the first
    /// polled model.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn synthesize(
        &self,
        event_id: &EventId,
        source_ids: Option<&[SourceId]>,
        model_id: Option<&str>,
    ) -> Result<Synthesis, EngineError> {
        let event = EventRepo::new(self.db.clone())
            .find(event_id)?
            .ok_or_else(|| EngineError::EventNotFound(event_id.clone()))?;

        let repo = SourceRepo::new(self.db.clone());
        let sources = match source_ids {
            Some(ids) => repo
                .list_for_event(event_id)?
                .into_iter()
                .filter(|s| ids.contains(&s.id))
                .collect(),
            None => repo.active_for(event_id)?,
        };

        let providers = &self.services.providers;
        let model = model_id
            .and_then(|id| providers.iter().find(|m| m.provider.model() == id))
            .or_else(|| providers.first())
            .ok_or_else(|| GatewayError::NotConfigured("a polled model".into()))?;

        let prompt = build_poll_prompt(&event.prompt_template, &sources, &[]);
        let options = CompletionOptions::with_max_output_tokens(model.max_output_tokens);
        let completion = bounded(
            self.config.provider_timeout,
            model.provider.complete(&prompt, &options),
        )
        .await?;

        let latest = SnapshotRepo::new(self.db.clone())
            .latest_for(event_id, model.provider.model(), 1)?
            .into_iter()
            .next();
        info!(
            model_id = %model.provider.model(),
            sources = sources.len(),
            "synthesis generated"
        );
        Ok(Synthesis {
            synthesized_text: completion.text,
            latest_snapshot_text: latest.map(|s| s.response_text),
            model_id: model.provider.model().to_string(),
            sources_used: sources.len(),
        })
    }
}
