use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use driftwatch_core::ids::{EventId, FactNodeId, SnapshotId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_timestamp};
use crate::vectors;

/// One extracted claim of a snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct FactNodeRow {
    pub id: FactNodeId,
    pub snapshot_id: SnapshotId,
    pub event_id: EventId,
    pub claim: String,
    #[serde(skip_serializing)]
    pub claim_embedding: Option<Vec<f32>>,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewFactNode {
    pub snapshot_id: SnapshotId,
    pub event_id: EventId,
    pub claim: String,
    pub claim_embedding: Option<Vec<f32>>,
    pub confidence: Option<f64>,
}

pub struct FactRepo {
    db: Database,
}

impl FactRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, new), fields(snapshot_id = %new.snapshot_id))]
    pub fn create(&self, new: &NewFactNode) -> Result<FactNodeRow, StoreError> {
        let id = FactNodeId::new();
        let created_at = Utc::now();
        let blob = new.claim_embedding.as_deref().map(vectors::f32_slice_to_blob);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO fact_nodes
                 (id, snapshot_id, event_id, claim, claim_embedding, confidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.as_str(),
                    new.snapshot_id.as_str(),
                    new.event_id.as_str(),
                    new.claim,
                    blob,
                    new.confidence,
                    fmt_timestamp(&created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(FactNodeRow {
            id,
            snapshot_id: new.snapshot_id.clone(),
            event_id: new.event_id.clone(),
            claim: new.claim.clone(),
            claim_embedding: new.claim_embedding.clone(),
            confidence: new.confidence,
            created_at,
        })
    }

    /// Facts of one snapshot in extraction order.
    #[instrument(skip(self), fields(snapshot_id = %snapshot_id))]
    pub fn list_for_snapshot(
        &self,
        snapshot_id: &SnapshotId,
    ) -> Result<Vec<FactNodeRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, snapshot_id, event_id, claim, claim_embedding, confidence, created_at
                 FROM fact_nodes WHERE snapshot_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let mut rows = stmt.query([snapshot_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_fact(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> Result<FactNodeRow, StoreError> {
    Ok(FactNodeRow {
        id: FactNodeId::from_raw(row_helpers::get::<String>(row, 0, "fact_nodes", "id")?),
        snapshot_id: SnapshotId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "fact_nodes",
            "snapshot_id",
        )?),
        event_id: EventId::from_raw(row_helpers::get::<String>(row, 2, "fact_nodes", "event_id")?),
        claim: row_helpers::get(row, 3, "fact_nodes", "claim")?,
        claim_embedding: vectors::get_embedding(row, 4, "fact_nodes", "claim_embedding")?,
        confidence: row_helpers::get_opt(row, 5, "fact_nodes", "confidence")?,
        created_at: row_helpers::get_timestamp(row, 6, "fact_nodes", "created_at")?,
    })
}
