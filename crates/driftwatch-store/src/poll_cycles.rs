use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use driftwatch_core::ids::{EventId, PollCycleId, SourceId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for CycleStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown cycle status: {other}")),
        }
    }
}

/// One poll of one event. `frozen_source_ids` never changes after insert.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollCycleRow {
    pub id: PollCycleId,
    pub event_id: EventId,
    pub frozen_source_ids: Vec<SourceId>,
    pub status: CycleStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

const CYCLE_COLUMNS: &str = "id, event_id, frozen_source_ids, status, started_at, completed_at";

pub struct PollCycleRepo {
    db: Database,
}

impl PollCycleRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        event_id: &EventId,
        frozen_source_ids: &[SourceId],
    ) -> Result<PollCycleRow, StoreError> {
        self.create_at(event_id, frozen_source_ids, Utc::now())
    }

    /// Open a running cycle with its evidence set frozen.
    #[instrument(
        skip(self, frozen_source_ids),
        fields(event_id = %event_id, sources = frozen_source_ids.len())
    )]
    pub fn create_at(
        &self,
        event_id: &EventId,
        frozen_source_ids: &[SourceId],
        started_at: DateTime<Utc>,
    ) -> Result<PollCycleRow, StoreError> {
        let id = PollCycleId::new();
        let frozen = serde_json::to_string(frozen_source_ids)
            .map_err(|e| StoreError::Database(format!("encode frozen_source_ids: {e}")))?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO poll_cycles (id, event_id, frozen_source_ids, status, started_at)
                 VALUES (?1, ?2, ?3, 'running', ?4)",
                rusqlite::params![
                    id.as_str(),
                    event_id.as_str(),
                    frozen,
                    fmt_timestamp(&started_at)
                ],
            )?;
            Ok(())
        })?;
        Ok(PollCycleRow {
            id,
            event_id: event_id.clone(),
            frozen_source_ids: frozen_source_ids.to_vec(),
            status: CycleStatus::Running,
            started_at,
            completed_at: None,
        })
    }

    #[instrument(skip(self), fields(poll_cycle_id = %id))]
    pub fn get(&self, id: &PollCycleId) -> Result<PollCycleRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {CYCLE_COLUMNS} FROM poll_cycles WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_cycle(row),
                None => Err(StoreError::NotFound(format!("poll cycle {id}"))),
            }
        })
    }

    /// `running -> completed`.
    #[instrument(skip(self), fields(poll_cycle_id = %id))]
    pub fn complete(&self, id: &PollCycleId) -> Result<(), StoreError> {
        self.finish(id, CycleStatus::Completed)
    }

    /// `running -> failed`.
    #[instrument(skip(self), fields(poll_cycle_id = %id))]
    pub fn fail(&self, id: &PollCycleId) -> Result<(), StoreError> {
        self.finish(id, CycleStatus::Failed)
    }

    fn finish(&self, id: &PollCycleId, status: CycleStatus) -> Result<(), StoreError> {
        let now = fmt_timestamp(&Utc::now());
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE poll_cycles SET status = ?1, completed_at = ?2
                 WHERE id = ?3 AND status = 'running'",
                rusqlite::params![status.to_string(), now, id.as_str()],
            )?)
        })?;
        if changed == 0 {
            let current = self.get(id)?;
            return Err(StoreError::Conflict(format!(
                "poll cycle {id} is already {}",
                current.status
            )));
        }
        Ok(())
    }

    /// The latest completed cycle of the same event that started before `current`.
    #[instrument(
        skip(self, current),
        fields(poll_cycle_id = %current.id, event_id = %current.event_id)
    )]
    pub fn previous_completed(
        &self,
        current: &PollCycleRow,
    ) -> Result<Option<PollCycleRow>, StoreError> {
        let started = fmt_timestamp(&current.started_at);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CYCLE_COLUMNS} FROM poll_cycles
                 WHERE event_id = ?1 AND status = 'completed' AND id != ?2
                   AND (started_at < ?3 OR (started_at = ?3 AND id < ?2))
                 ORDER BY started_at DESC, id DESC LIMIT 1"
            ))?;
            let mut rows = stmt.query(rusqlite::params![
                current.event_id.as_str(),
                current.id.as_str(),
                started
            ])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_cycle(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Fail every cycle still running that started before `cutoff`, except
    /// those of events in `live_events` (their orchestration is still going).
    #[instrument(skip(self, live_events), fields(live = live_events.len()))]
    pub fn fail_stale(
        &self,
        cutoff: DateTime<Utc>,
        live_events: &[EventId],
    ) -> Result<usize, StoreError> {
        let now = fmt_timestamp(&Utc::now());
        let count = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, event_id FROM poll_cycles
                 WHERE status = 'running' AND started_at < ?1",
            )?;
            let stale = stmt
                .query_map([fmt_timestamp(&cutoff)], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut count = 0;
            for (id, event_id) in stale {
                if live_events.iter().any(|e| e.as_str() == event_id) {
                    continue;
                }
                count += conn.execute(
                    "UPDATE poll_cycles SET status = 'failed', completed_at = ?1
                     WHERE id = ?2 AND status = 'running'",
                    rusqlite::params![now, id],
                )?;
            }
            Ok(count)
        })?;
        if count > 0 {
            warn!(count, "stale poll cycles marked failed");
        }
        Ok(count)
    }

    /// Cycles for an event, newest first.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn list_for_event(
        &self,
        event_id: &EventId,
        limit: u32,
    ) -> Result<Vec<PollCycleRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CYCLE_COLUMNS} FROM poll_cycles WHERE event_id = ?1
                 ORDER BY started_at DESC, id DESC LIMIT ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![event_id.as_str(), limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_cycle(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_cycle(row: &rusqlite::Row<'_>) -> Result<PollCycleRow, StoreError> {
    let frozen: String = row_helpers::get(row, 2, "poll_cycles", "frozen_source_ids")?;
    let frozen_source_ids =
        serde_json::from_str(&frozen).map_err(|e| StoreError::CorruptRow {
            table: "poll_cycles",
            column: "frozen_source_ids",
            detail: format!("invalid JSON: {e}"),
        })?;
    let status_str: String = row_helpers::get(row, 3, "poll_cycles", "status")?;
    Ok(PollCycleRow {
        id: PollCycleId::from_raw(row_helpers::get::<String>(row, 0, "poll_cycles", "id")?),
        event_id: EventId::from_raw(row_helpers::get::<String>(row, 1, "poll_cycles", "event_id")?),
        frozen_source_ids,
        status: row_helpers::parse_enum(&status_str, "poll_cycles", "status")?,
        started_at: row_helpers::get_timestamp(row, 4, "poll_cycles", "started_at")?,
        completed_at: row_helpers::get_timestamp_opt(row, 5, "poll_cycles", "completed_at")?,
    })
}
