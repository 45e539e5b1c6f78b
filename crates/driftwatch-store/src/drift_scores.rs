use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use driftwatch_core::ids::{DriftScoreId, EventId, SnapshotId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_timestamp};

#[derive(Clone, Debug, Serialize)]
pub struct DriftScoreRow {
    pub id: DriftScoreId,
    pub event_id: EventId,
    pub snapshot_id: SnapshotId,
    pub previous_snapshot_id: SnapshotId,
    pub cosine_similarity: f64,
    pub drift_magnitude: f64,
    pub ghost_pivot: bool,
    pub explanation: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewDriftScore {
    pub event_id: EventId,
    pub snapshot_id: SnapshotId,
    pub previous_snapshot_id: SnapshotId,
    pub cosine_similarity: f64,
    pub drift_magnitude: f64,
    pub ghost_pivot: bool,
    pub explanation: Option<String>,
}

const DRIFT_COLUMNS: &str = "id, event_id, snapshot_id, previous_snapshot_id, cosine_similarity,
    drift_magnitude, ghost_pivot, explanation, created_at";

pub struct DriftScoreRepo {
    db: Database,
}

impl DriftScoreRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert one score per (current, previous) pair. Returns `None` when the
    /// pair was already scored.
    #[instrument(skip(self, new), fields(
        event_id = %new.event_id,
        snapshot_id = %new.snapshot_id,
        ghost_pivot = new.ghost_pivot
    ))]
    pub fn insert(&self, new: &NewDriftScore) -> Result<Option<DriftScoreRow>, StoreError> {
        let id = DriftScoreId::new();
        let created_at = Utc::now();
        let inserted = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "INSERT OR IGNORE INTO drift_scores
                 (id, event_id, snapshot_id, previous_snapshot_id,
                  cosine_similarity, drift_magnitude, ghost_pivot, explanation, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    id.as_str(),
                    new.event_id.as_str(),
                    new.snapshot_id.as_str(),
                    new.previous_snapshot_id.as_str(),
                    new.cosine_similarity,
                    new.drift_magnitude,
                    new.ghost_pivot,
                    new.explanation,
                    fmt_timestamp(&created_at),
                ],
            )?)
        })?;
        if inserted == 0 {
            debug!("drift pair already scored");
            return Ok(None);
        }
        Ok(Some(DriftScoreRow {
            id,
            event_id: new.event_id.clone(),
            snapshot_id: new.snapshot_id.clone(),
            previous_snapshot_id: new.previous_snapshot_id.clone(),
            cosine_similarity: new.cosine_similarity,
            drift_magnitude: new.drift_magnitude,
            ghost_pivot: new.ghost_pivot,
            explanation: new.explanation.clone(),
            created_at,
        }))
    }

    #[instrument(skip(self), fields(snapshot_id = %current))]
    pub fn exists_for_pair(
        &self,
        current: &SnapshotId,
        previous: &SnapshotId,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM drift_scores
                 WHERE snapshot_id = ?1 AND previous_snapshot_id = ?2",
                [current.as_str(), previous.as_str()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Scores for an event, newest first.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn list_for_event(
        &self,
        event_id: &EventId,
        limit: u32,
    ) -> Result<Vec<DriftScoreRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DRIFT_COLUMNS} FROM drift_scores WHERE event_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![event_id.as_str(), limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_drift(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_drift(row: &rusqlite::Row<'_>) -> Result<DriftScoreRow, StoreError> {
    const T: &str = "drift_scores";
    Ok(DriftScoreRow {
        id: DriftScoreId::from_raw(row_helpers::get::<String>(row, 0, T, "id")?),
        event_id: EventId::from_raw(row_helpers::get::<String>(row, 1, T, "event_id")?),
        snapshot_id: SnapshotId::from_raw(row_helpers::get::<String>(row, 2, T, "snapshot_id")?),
        previous_snapshot_id: SnapshotId::from_raw(row_helpers::get::<String>(
            row,
            3,
            T,
            "previous_snapshot_id",
        )?),
        cosine_similarity: row_helpers::get(row, 4, T, "cosine_similarity")?,
        drift_magnitude: row_helpers::get(row, 5, T, "drift_magnitude")?,
        ghost_pivot: row_helpers::get(row, 6, T, "ghost_pivot")?,
        explanation: row_helpers::get_opt(row, 7, T, "explanation")?,
        created_at: row_helpers::get_timestamp(row, 8, T, "created_at")?,
    })
}
