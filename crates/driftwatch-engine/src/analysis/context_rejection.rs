use std::sync::Arc;
use std::time::Duration;

use driftwatch_embeddings::{cosine_similarity, EmbeddingService};
use driftwatch_llm::FactExtractor;
use driftwatch_store::{
    ContextRejectionRepo, ContextRejectionRow, Database, NewContextRejection, SearchResultRow,
    SnapshotRow,
};
use tracing::{info, instrument, warn};

use crate::error::EngineError;
use crate::services::bounded;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Grounding facts scoring strictly below this against the response were ignored.
pub const REJECTION_THRESHOLD: f64 = 0.45;

pub fn is_rejected(similarity: f64) -> bool {
    similarity < REJECTION_THRESHOLD
}

/// Checks which grounding facts a model was handed but left out.
pub struct ContextRejectionDetector {
    db: Database,
    facts: Arc<dyn FactExtractor>,
    embeddings: Arc<dyn EmbeddingService>,
    step_timeout: Duration,
}

impl ContextRejectionDetector {
    pub fn new(
        db: Database,
        facts: Arc<dyn FactExtractor>,
        embeddings: Arc<dyn EmbeddingService>,
    ) -> Self {
        Self {
            db,
            facts,
            embeddings,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Budget for each extraction and embedding call.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// One row per extracted fact, rejected or not. A result whose key
    /// facts cannot be extracted is skipped.
    #[instrument(skip_all, fields(
        event_id = %snapshot.event_id,
        snapshot_id = %snapshot.id,
        model_id = %snapshot.model_id,
        results = results.len()
    ))]
    pub async fn detect(
        &self,
        snapshot: &SnapshotRow,
        results: &[SearchResultRow],
    ) -> Result<Vec<ContextRejectionRow>, EngineError> {
        if results.is_empty() {
            return Ok(Vec::new());
        }
        let response_embedding = match &snapshot.embedding {
            Some(embedding) => embedding.clone(),
            None => {
                bounded(self.step_timeout, self.embeddings.embed_single(&snapshot.response_text))
                    .await?
            }
        };

        let repo = ContextRejectionRepo::new(self.db.clone());
        let mut rows = Vec::new();
        for result in results {
            let extracted =
                bounded(self.step_timeout, self.facts.extract_key_facts(&result.content)).await;
            let key_facts = match extracted {
                Ok(facts) if !facts.is_empty() => facts,
                Ok(_) => continue,
                Err(e) => {
                    warn!(search_result_id = %result.id, error = %e, "key fact extraction failed");
                    continue;
                }
            };
            let fact_embeddings =
                bounded(self.step_timeout, self.embeddings.embed(&key_facts)).await?;
            if fact_embeddings.len() != key_facts.len() {
                warn!(
                    search_result_id = %result.id,
                    expected = key_facts.len(),
                    actual = fact_embeddings.len(),
                    "key fact embedding count mismatch, skipping result"
                );
                continue;
            }
            for (fact, embedding) in key_facts.into_iter().zip(fact_embeddings) {
                let similarity = cosine_similarity(&embedding, &response_embedding);
                rows.push(repo.create(&NewContextRejection {
                    snapshot_id: snapshot.id.clone(),
                    event_id: snapshot.event_id.clone(),
                    search_result_id: result.id.clone(),
                    provided_fact: fact,
                    rejected: is_rejected(similarity),
                    similarity,
                })?);
            }
        }

        let rejected = rows.iter().filter(|r| r.rejected).count();
        info!(checked = rows.len(), rejected, "context rejection checked");
        Ok(rows)
    }
}
