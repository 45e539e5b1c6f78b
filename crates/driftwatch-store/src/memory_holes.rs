use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use driftwatch_core::ids::{EventId, FactNodeId, MemoryHoleId, SnapshotId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_timestamp};

/// A claim present in one snapshot and absent from the next same-model one.
#[derive(Clone, Debug, Serialize)]
pub struct MemoryHoleRow {
    pub id: MemoryHoleId,
    pub event_id: EventId,
    pub fact_node_id: FactNodeId,
    /// Claim text, joined from `fact_nodes` on read.
    pub claim: Option<String>,
    pub last_seen_snapshot_id: SnapshotId,
    pub missing_from_snapshot_id: SnapshotId,
    pub best_similarity: f64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewMemoryHole {
    pub event_id: EventId,
    pub fact_node_id: FactNodeId,
    pub last_seen_snapshot_id: SnapshotId,
    pub missing_from_snapshot_id: SnapshotId,
    pub best_similarity: f64,
}

pub struct MemoryHoleRepo {
    db: Database,
}

impl MemoryHoleRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(
        skip(self, new),
        fields(event_id = %new.event_id, fact_node_id = %new.fact_node_id)
    )]
    pub fn create(&self, new: &NewMemoryHole) -> Result<MemoryHoleRow, StoreError> {
        let id = MemoryHoleId::new();
        let detected_at = Utc::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memory_holes (id, event_id, fact_node_id, last_seen_snapshot_id,
                        missing_from_snapshot_id, best_similarity, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.as_str(),
                    new.event_id.as_str(),
                    new.fact_node_id.as_str(),
                    new.last_seen_snapshot_id.as_str(),
                    new.missing_from_snapshot_id.as_str(),
                    new.best_similarity,
                    fmt_timestamp(&detected_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(MemoryHoleRow {
            id,
            event_id: new.event_id.clone(),
            fact_node_id: new.fact_node_id.clone(),
            claim: None,
            last_seen_snapshot_id: new.last_seen_snapshot_id.clone(),
            missing_from_snapshot_id: new.missing_from_snapshot_id.clone(),
            best_similarity: new.best_similarity,
            detected_at,
        })
    }

    /// Holes for an event, newest first.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn list_for_event(
        &self,
        event_id: &EventId,
        limit: u32,
    ) -> Result<Vec<MemoryHoleRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT h.id, h.event_id, h.fact_node_id, f.claim, h.last_seen_snapshot_id,
                        h.missing_from_snapshot_id, h.best_similarity, h.detected_at
                 FROM memory_holes h LEFT JOIN fact_nodes f ON f.id = h.fact_node_id
                 WHERE h.event_id = ?1
                 ORDER BY h.detected_at DESC, h.id DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![event_id.as_str(), limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_hole(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(snapshot_id = %snapshot_id))]
    pub fn list_missing_from(
        &self,
        snapshot_id: &SnapshotId,
    ) -> Result<Vec<MemoryHoleRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT h.id, h.event_id, h.fact_node_id, f.claim, h.last_seen_snapshot_id,
                        h.missing_from_snapshot_id, h.best_similarity, h.detected_at
                 FROM memory_holes h LEFT JOIN fact_nodes f ON f.id = h.fact_node_id
                 WHERE h.missing_from_snapshot_id = ?1
                 ORDER BY h.detected_at ASC, h.id ASC",
            )?;
            let mut rows = stmt.query([snapshot_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_hole(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_hole(row: &rusqlite::Row<'_>) -> Result<MemoryHoleRow, StoreError> {
    const T: &str = "memory_holes";
    Ok(MemoryHoleRow {
        id: MemoryHoleId::from_raw(row_helpers::get::<String>(row, 0, T, "id")?),
        event_id: EventId::from_raw(row_helpers::get::<String>(row, 1, T, "event_id")?),
        fact_node_id: FactNodeId::from_raw(row_helpers::get::<String>(row, 2, T, "fact_node_id")?),
        claim: row_helpers::get_opt(row, 3, "fact_nodes", "claim")?,
        last_seen_snapshot_id: SnapshotId::from_raw(row_helpers::get::<String>(
            row,
            4,
            T,
            "last_seen_snapshot_id",
        )?),
        missing_from_snapshot_id: SnapshotId::from_raw(row_helpers::get::<String>(
            row,
            5,
            T,
            "missing_from_snapshot_id",
        )?),
        best_similarity: row_helpers::get(row, 6, T, "best_similarity")?,
        detected_at: row_helpers::get_timestamp(row, 7, T, "detected_at")?,
    })
}
