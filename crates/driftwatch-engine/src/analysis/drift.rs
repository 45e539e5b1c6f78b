use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use driftwatch_core::ids::SourceId;
use driftwatch_core::{CompletionOptions, ModelProvider};
use driftwatch_embeddings::cosine_similarity;
use driftwatch_store::{
    Database, DriftScoreRepo, DriftScoreRow, EventRow, NewDriftScore, PollCycleRepo, SnapshotRepo,
    SnapshotRow,
};
use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;
use crate::services::bounded;

const EXPLANATION_EXCERPT_CHARS: usize = 2000;
const DEFAULT_EXPLAIN_TIMEOUT: Duration = Duration::from_secs(60);
pub const EXPLANATION_FALLBACK: &str = "Failed to generate explanation.";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriftMeasurement {
    pub similarity: f64,
    /// Always exactly `1 - similarity`.
    pub magnitude: f64,
    pub ghost_pivot: bool,
}

/// Order-independent comparison of two frozen evidence sets.
pub fn same_source_set(a: &[SourceId], b: &[SourceId]) -> bool {
    let a: BTreeSet<&SourceId> = a.iter().collect();
    let b: BTreeSet<&SourceId> = b.iter().collect();
    a == b
}

/// Ghost pivot: the narrative moved past the threshold while the evidence
/// stayed the same.
pub fn measure_drift(
    current: &[f32],
    previous: &[f32],
    threshold: f64,
    sources_unchanged: bool,
) -> DriftMeasurement {
    let similarity = cosine_similarity(current, previous);
    let magnitude = 1.0 - similarity;
    DriftMeasurement {
        similarity,
        magnitude,
        ghost_pivot: magnitude > threshold && sources_unchanged,
    }
}

fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(EXPLANATION_EXCERPT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn explanation_prompt(
    model_id: &str,
    previous_text: &str,
    current_text: &str,
    measurement: &DriftMeasurement,
) -> String {
    format!(
        "Two AI-generated summaries of the same event were produced using the EXACT same sources, but the narrative shifted significantly.\n\
         \n\
         PREVIOUS summary (by {model_id}):\n\
         {previous}\n\
         \n\
         CURRENT summary (by {model_id}):\n\
         {current}\n\
         \n\
         Cosine similarity: {similarity:.4} (drift magnitude: {magnitude:.4})\n\
         \n\
         Analyze: What specifically changed in the narrative? Why is this suspicious given that no new facts were added? Be specific about which claims shifted, appeared, or disappeared.",
        previous = excerpt(previous_text),
        current = excerpt(current_text),
        similarity = measurement.similarity,
        magnitude = measurement.magnitude,
    )
}

/// Scores each embedded snapshot against the same model's previous one.
pub struct DriftAnalyzer {
    db: Database,
    analyst: Arc<dyn ModelProvider>,
    explain_timeout: Duration,
}

impl DriftAnalyzer {
    pub fn new(db: Database, analyst: Arc<dyn ModelProvider>) -> Self {
        Self {
            db,
            analyst,
            explain_timeout: DEFAULT_EXPLAIN_TIMEOUT,
        }
    }

    pub fn with_explain_timeout(mut self, timeout: Duration) -> Self {
        self.explain_timeout = timeout;
        self
    }

    /// `cycle_sources` is the current cycle's frozen set. The previous
    /// snapshot's own cycle supplies the other side; `fallback_previous`
    /// is used when that cycle cannot be read.
    #[instrument(skip_all, fields(
        event_id = %event.id,
        snapshot_id = %snapshot.id,
        model_id = %snapshot.model_id
    ))]
    pub async fn analyze(
        &self,
        event: &EventRow,
        snapshot: &SnapshotRow,
        cycle_sources: &[SourceId],
        fallback_previous: &[SourceId],
    ) -> Result<Option<DriftScoreRow>, EngineError> {
        let Some(current) = snapshot.embedding.as_deref() else {
            debug!("snapshot has no embedding yet");
            return Ok(None);
        };
        let Some(previous) = SnapshotRepo::new(self.db.clone()).previous_for(snapshot)? else {
            debug!("no previous snapshot for this model");
            return Ok(None);
        };
        let Some(previous_embedding) = previous.embedding.as_deref() else {
            debug!(previous_snapshot_id = %previous.id, "previous snapshot has no embedding");
            return Ok(None);
        };
        if current.len() != previous_embedding.len() || current.is_empty() {
            warn!(
                current_dims = current.len(),
                previous_dims = previous_embedding.len(),
                "embedding dimensions differ, skipping drift"
            );
            return Ok(None);
        }

        let scores = DriftScoreRepo::new(self.db.clone());
        if scores.exists_for_pair(&snapshot.id, &previous.id)? {
            return Ok(None);
        }

        let previous_cycle = PollCycleRepo::new(self.db.clone()).get(&previous.poll_cycle_id);
        let previous_sources = match previous_cycle {
            Ok(cycle) => cycle.frozen_source_ids,
            Err(e) => {
                warn!(error = %e, "previous cycle unreadable, using fallback source set");
                fallback_previous.to_vec()
            }
        };
        let unchanged = same_source_set(cycle_sources, &previous_sources);
        let measurement =
            measure_drift(current, previous_embedding, event.drift_threshold, unchanged);

        let explanation = if measurement.ghost_pivot {
            Some(self.explain(snapshot, &previous, &measurement).await)
        } else {
            None
        };

        let row = scores.insert(&NewDriftScore {
            event_id: event.id.clone(),
            snapshot_id: snapshot.id.clone(),
            previous_snapshot_id: previous.id.clone(),
            cosine_similarity: measurement.similarity,
            drift_magnitude: measurement.magnitude,
            ghost_pivot: measurement.ghost_pivot,
            explanation,
        })?;
        if let Some(row) = &row {
            info!(
                similarity = row.cosine_similarity,
                magnitude = row.drift_magnitude,
                ghost_pivot = row.ghost_pivot,
                "drift scored"
            );
        }
        Ok(row)
    }

    async fn explain(
        &self,
        current: &SnapshotRow,
        previous: &SnapshotRow,
        measurement: &DriftMeasurement,
    ) -> String {
        let prompt = explanation_prompt(
            &current.model_id,
            &previous.response_text,
            &current.response_text,
            measurement,
        );
        let options = CompletionOptions::default();
        let result = bounded(self.explain_timeout, self.analyst.complete(&prompt, &options)).await;
        match result {
            Ok(completion) => completion.text,
            Err(e) => {
                warn!(error = %e, "ghost pivot explanation failed");
                EXPLANATION_FALLBACK.to_string()
            }
        }
    }
}
