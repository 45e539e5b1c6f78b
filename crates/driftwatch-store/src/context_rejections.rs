use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use driftwatch_core::ids::{ContextRejectionId, EventId, SearchResultId, SnapshotId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_timestamp};

/// Whether one grounding fact made it into a snapshot's answer.
#[derive(Clone, Debug, Serialize)]
pub struct ContextRejectionRow {
    pub id: ContextRejectionId,
    pub snapshot_id: SnapshotId,
    pub event_id: EventId,
    pub search_result_id: SearchResultId,
    pub provided_fact: String,
    pub rejected: bool,
    pub similarity: f64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewContextRejection {
    pub snapshot_id: SnapshotId,
    pub event_id: EventId,
    pub search_result_id: SearchResultId,
    pub provided_fact: String,
    pub rejected: bool,
    pub similarity: f64,
}

const REJECTION_COLUMNS: &str =
    "id, snapshot_id, event_id, search_result_id, provided_fact, rejected, similarity, detected_at";

pub struct ContextRejectionRepo {
    db: Database,
}

impl ContextRejectionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, new), fields(snapshot_id = %new.snapshot_id, rejected = new.rejected))]
    pub fn create(&self, new: &NewContextRejection) -> Result<ContextRejectionRow, StoreError> {
        let id = ContextRejectionId::new();
        let detected_at = Utc::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO context_rejections (id, snapshot_id, event_id, search_result_id,
                        provided_fact, rejected, similarity, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    id.as_str(),
                    new.snapshot_id.as_str(),
                    new.event_id.as_str(),
                    new.search_result_id.as_str(),
                    new.provided_fact,
                    new.rejected,
                    new.similarity,
                    fmt_timestamp(&detected_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(ContextRejectionRow {
            id,
            snapshot_id: new.snapshot_id.clone(),
            event_id: new.event_id.clone(),
            search_result_id: new.search_result_id.clone(),
            provided_fact: new.provided_fact.clone(),
            rejected: new.rejected,
            similarity: new.similarity,
            detected_at,
        })
    }

    #[instrument(skip(self), fields(snapshot_id = %snapshot_id))]
    pub fn list_for_snapshot(
        &self,
        snapshot_id: &SnapshotId,
    ) -> Result<Vec<ContextRejectionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REJECTION_COLUMNS} FROM context_rejections WHERE snapshot_id = ?1
                 ORDER BY detected_at ASC, id ASC"
            ))?;
            let mut rows = stmt.query([snapshot_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_rejection(row)?);
            }
            Ok(results)
        })
    }

    /// Rows for an event, newest first.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn list_for_event(
        &self,
        event_id: &EventId,
        limit: u32,
    ) -> Result<Vec<ContextRejectionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REJECTION_COLUMNS} FROM context_rejections WHERE event_id = ?1
                 ORDER BY detected_at DESC, id DESC LIMIT ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![event_id.as_str(), limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_rejection(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_rejection(row: &rusqlite::Row<'_>) -> Result<ContextRejectionRow, StoreError> {
    const T: &str = "context_rejections";
    Ok(ContextRejectionRow {
        id: ContextRejectionId::from_raw(row_helpers::get::<String>(row, 0, T, "id")?),
        snapshot_id: SnapshotId::from_raw(row_helpers::get::<String>(row, 1, T, "snapshot_id")?),
        event_id: EventId::from_raw(row_helpers::get::<String>(row, 2, T, "event_id")?),
        search_result_id: SearchResultId::from_raw(row_helpers::get::<String>(
            row,
            3,
            T,
            "search_result_id",
        )?),
        provided_fact: row_helpers::get(row, 4, T, "provided_fact")?,
        rejected: row_helpers::get(row, 5, T, "rejected")?,
        similarity: row_helpers::get(row, 6, T, "similarity")?,
        detected_at: row_helpers::get_timestamp(row, 7, T, "detected_at")?,
    })
}
