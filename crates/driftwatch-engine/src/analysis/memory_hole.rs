use driftwatch_core::ids::EventId;
use driftwatch_embeddings::cosine_similarity;
use driftwatch_store::{
    Database, FactNodeRow, FactRepo, MemoryHoleRepo, MemoryHoleRow, NewMemoryHole, SnapshotRepo,
    SnapshotRow,
};
use tracing::{debug, info, instrument};

use crate::error::EngineError;

/// A previous claim is considered carried over when some current claim
/// reaches this similarity.
pub const MEMORY_HOLE_THRESHOLD: f64 = 0.8;

#[derive(Clone, Copy, Debug)]
pub struct VanishedFact<'a> {
    pub fact: &'a FactNodeRow,
    pub best_similarity: f64,
}

/// Brute-force best match of every embedded previous fact against every
/// embedded current fact. Previous facts without an embedding are skipped;
/// with no comparable current fact the best similarity stays 0.
pub fn find_vanished<'a>(
    previous: &'a [FactNodeRow],
    current: &[FactNodeRow],
) -> Vec<VanishedFact<'a>> {
    let current_embeddings: Vec<&[f32]> = current
        .iter()
        .filter_map(|f| f.claim_embedding.as_deref())
        .collect();

    previous
        .iter()
        .filter_map(|fact| {
            let embedding = fact.claim_embedding.as_deref()?;
            let best_similarity = current_embeddings
                .iter()
                .map(|c| cosine_similarity(embedding, c))
                .fold(0.0_f64, f64::max);
            (best_similarity < MEMORY_HOLE_THRESHOLD).then_some(VanishedFact {
                fact,
                best_similarity,
            })
        })
        .collect()
}

pub struct MemoryHoleDetector {
    db: Database,
}

impl MemoryHoleDetector {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record claims of the previous same-model snapshot that no longer
    /// appear in `snapshot`. Nothing is recorded when either side has no
    /// facts or there is no previous snapshot.
    #[instrument(skip_all, fields(
        event_id = %event_id,
        snapshot_id = %snapshot.id,
        model_id = %snapshot.model_id
    ))]
    pub fn detect(
        &self,
        event_id: &EventId,
        snapshot: &SnapshotRow,
    ) -> Result<Vec<MemoryHoleRow>, EngineError> {
        let facts = FactRepo::new(self.db.clone());
        let current = facts.list_for_snapshot(&snapshot.id)?;
        if current.is_empty() {
            debug!("current snapshot has no facts");
            return Ok(Vec::new());
        }
        let Some(previous_snapshot) = SnapshotRepo::new(self.db.clone()).previous_for(snapshot)?
        else {
            return Ok(Vec::new());
        };
        let previous = facts.list_for_snapshot(&previous_snapshot.id)?;
        if previous.is_empty() {
            return Ok(Vec::new());
        }

        let repo = MemoryHoleRepo::new(self.db.clone());
        let mut holes = Vec::new();
        for vanished in find_vanished(&previous, &current) {
            let mut row = repo.create(&NewMemoryHole {
                event_id: event_id.clone(),
                fact_node_id: vanished.fact.id.clone(),
                last_seen_snapshot_id: previous_snapshot.id.clone(),
                missing_from_snapshot_id: snapshot.id.clone(),
                best_similarity: vanished.best_similarity,
            })?;
            row.claim = Some(vanished.fact.claim.clone());
            holes.push(row);
        }
        if !holes.is_empty() {
            info!(count = holes.len(), "memory holes detected");
        }
        Ok(holes)
    }
}
