use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use driftwatch_core::ids::{EventId, PollCycleId, SnapshotId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_timestamp};
use crate::vectors;

/// One model's answer within one poll cycle.
#[derive(Clone, Debug, Serialize)]
pub struct SnapshotRow {
    pub id: SnapshotId,
    pub event_id: EventId,
    pub poll_cycle_id: PollCycleId,
    pub model_id: String,
    pub provider: String,
    pub prompt_used: String,
    pub response_text: String,
    /// `None` until backfilled; never a zero vector.
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub token_count: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewSnapshot {
    pub event_id: EventId,
    pub poll_cycle_id: PollCycleId,
    pub model_id: String,
    pub provider: String,
    pub prompt_used: String,
    pub response_text: String,
    pub token_count: Option<u32>,
}

const SNAPSHOT_COLUMNS: &str = "id, event_id, poll_cycle_id, model_id, provider, prompt_used,
    response_text, embedding, token_count, created_at";

pub struct SnapshotRepo {
    db: Database,
}

impl SnapshotRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(&self, new: &NewSnapshot) -> Result<SnapshotRow, StoreError> {
        self.create_at(new, Utc::now())
    }

    #[instrument(skip(self, new), fields(
        event_id = %new.event_id,
        poll_cycle_id = %new.poll_cycle_id,
        model_id = %new.model_id
    ))]
    pub fn create_at(
        &self,
        new: &NewSnapshot,
        created_at: DateTime<Utc>,
    ) -> Result<SnapshotRow, StoreError> {
        let id = SnapshotId::new();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO snapshots
                 (id, event_id, poll_cycle_id, model_id, provider, prompt_used,
                  response_text, token_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    id.as_str(),
                    new.event_id.as_str(),
                    new.poll_cycle_id.as_str(),
                    new.model_id,
                    new.provider,
                    new.prompt_used,
                    new.response_text,
                    new.token_count,
                    fmt_timestamp(&created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(SnapshotRow {
            id,
            event_id: new.event_id.clone(),
            poll_cycle_id: new.poll_cycle_id.clone(),
            model_id: new.model_id.clone(),
            provider: new.provider.clone(),
            prompt_used: new.prompt_used.clone(),
            response_text: new.response_text.clone(),
            embedding: None,
            token_count: new.token_count,
            created_at,
        })
    }

    #[instrument(skip(self), fields(snapshot_id = %id))]
    pub fn get(&self, id: &SnapshotId) -> Result<SnapshotRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_snapshot(row),
                None => Err(StoreError::NotFound(format!("snapshot {id}"))),
            }
        })
    }

    /// Backfill the response embedding.
    #[instrument(skip(self, embedding), fields(snapshot_id = %id, dims = embedding.len()))]
    pub fn set_embedding(&self, id: &SnapshotId, embedding: &[f32]) -> Result<(), StoreError> {
        let blob = vectors::f32_slice_to_blob(embedding);
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE snapshots SET embedding = ?1 WHERE id = ?2",
                rusqlite::params![blob, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("snapshot {id}")));
            }
            Ok(())
        })
    }

    /// The same (event, model) snapshot immediately preceding `current` by
    /// creation time, ties broken by id.
    #[instrument(
        skip(self, current),
        fields(snapshot_id = %current.id, model_id = %current.model_id)
    )]
    pub fn previous_for(&self, current: &SnapshotRow) -> Result<Option<SnapshotRow>, StoreError> {
        let created = fmt_timestamp(&current.created_at);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
                 WHERE event_id = ?1 AND model_id = ?2 AND id != ?3
                   AND (created_at < ?4 OR (created_at = ?4 AND id < ?3))
                 ORDER BY created_at DESC, id DESC LIMIT 1"
            ))?;
            let mut rows = stmt.query(rusqlite::params![
                current.event_id.as_str(),
                current.model_id,
                current.id.as_str(),
                created
            ])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_snapshot(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Most recent snapshots for one (event, model), newest first.
    #[instrument(skip(self), fields(event_id = %event_id, model_id))]
    pub fn latest_for(
        &self,
        event_id: &EventId,
        model_id: &str,
        limit: u32,
    ) -> Result<Vec<SnapshotRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
                 WHERE event_id = ?1 AND model_id = ?2
                 ORDER BY created_at DESC, id DESC LIMIT ?3"
            ))?;
            let mut rows = stmt.query(rusqlite::params![event_id.as_str(), model_id, limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_snapshot(row)?);
            }
            Ok(results)
        })
    }

    /// All models' snapshots for an event, newest first.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn list_for_event(
        &self,
        event_id: &EventId,
        limit: u32,
    ) -> Result<Vec<SnapshotRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE event_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![event_id.as_str(), limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_snapshot(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> Result<SnapshotRow, StoreError> {
    Ok(SnapshotRow {
        id: SnapshotId::from_raw(row_helpers::get::<String>(row, 0, "snapshots", "id")?),
        event_id: EventId::from_raw(row_helpers::get::<String>(row, 1, "snapshots", "event_id")?),
        poll_cycle_id: PollCycleId::from_raw(row_helpers::get::<String>(
            row,
            2,
            "snapshots",
            "poll_cycle_id",
        )?),
        model_id: row_helpers::get(row, 3, "snapshots", "model_id")?,
        provider: row_helpers::get(row, 4, "snapshots", "provider")?,
        prompt_used: row_helpers::get(row, 5, "snapshots", "prompt_used")?,
        response_text: row_helpers::get(row, 6, "snapshots", "response_text")?,
        embedding: vectors::get_embedding(row, 7, "snapshots", "embedding")?,
        token_count: row_helpers::get_opt(row, 8, "snapshots", "token_count")?,
        created_at: row_helpers::get_timestamp(row, 9, "snapshots", "created_at")?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::{EventRepo, NewEvent};
    use crate::poll_cycles::PollCycleRepo;
    use chrono::Duration;

    pub(crate) struct Fixture {
        pub db: Database,
        pub event_id: EventId,
    }

    impl Fixture {
        pub fn new() -> Self {
            let db = Database::in_memory().unwrap();
            let event = EventRepo::new(db.clone())
                .create(&NewEvent::new("Rail Strike", "What is happening with the rail strike?"))
                .unwrap();
            Self { db, event_id: event.id }
        }

        pub fn cycle(&self) -> PollCycleId {
            PollCycleRepo::new(self.db.clone())
                .create(&self.event_id, &[])
                .unwrap()
                .id
        }

        pub fn snapshot_at(&self, model_id: &str, text: &str, at: DateTime<Utc>) -> SnapshotRow {
            SnapshotRepo::new(self.db.clone())
                .create_at(
                    &NewSnapshot {
                        event_id: self.event_id.clone(),
                        poll_cycle_id: self.cycle(),
                        model_id: model_id.to_string(),
                        provider: "mock".to_string(),
                        prompt_used: "prompt".to_string(),
                        response_text: text.to_string(),
                        token_count: Some(42),
                    },
                    at,
                )
                .unwrap()
        }

        pub fn snapshot(&self, model_id: &str, text: &str) -> SnapshotRow {
            self.snapshot_at(model_id, text, Utc::now())
        }
    }

    #[test]
    fn create_get_and_backfill_embedding() {
        let fx = Fixture::new();
        let repo = SnapshotRepo::new(fx.db.clone());
        let snap = fx.snapshot("gpt-4o", "The strike continues.");

        let fetched = repo.get(&snap.id).unwrap();
        assert!(fetched.embedding.is_none());
        assert_eq!(fetched.token_count, Some(42));
        assert_eq!(fetched.response_text, "The strike continues.");

        repo.set_embedding(&snap.id, &[0.6, 0.8]).unwrap();
        assert_eq!(repo.get(&snap.id).unwrap().embedding, Some(vec![0.6, 0.8]));
    }

    #[test]
    fn one_snapshot_per_cycle_and_model() {
        let fx = Fixture::new();
        let repo = SnapshotRepo::new(fx.db.clone());
        let new = NewSnapshot {
            event_id: fx.event_id.clone(),
            poll_cycle_id: fx.cycle(),
            model_id: "grok-3".into(),
            provider: "xai".into(),
            prompt_used: "p".into(),
            response_text: "r".into(),
            token_count: None,
        };
        repo.create(&new).unwrap();
        assert!(matches!(repo.create(&new), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn previous_for_same_model_only() {
        let fx = Fixture::new();
        let repo = SnapshotRepo::new(fx.db.clone());
        let t0 = Utc::now() - Duration::hours(3);
        let first = fx.snapshot_at("gpt-4o", "one", t0);
        let _other_model = fx.snapshot_at("grok-3", "x", t0 + Duration::hours(1));
        let second = fx.snapshot_at("gpt-4o", "two", t0 + Duration::hours(2));
        let third = fx.snapshot_at("gpt-4o", "three", t0 + Duration::hours(3));

        assert_eq!(repo.previous_for(&third).unwrap().unwrap().id, second.id);
        assert_eq!(repo.previous_for(&second).unwrap().unwrap().id, first.id);
        assert!(repo.previous_for(&first).unwrap().is_none());
    }

    #[test]
    fn previous_for_breaks_timestamp_ties_by_id() {
        let fx = Fixture::new();
        let repo = SnapshotRepo::new(fx.db.clone());
        let at = Utc::now();
        let a = fx.snapshot_at("gpt-4o", "a", at);
        let b = fx.snapshot_at("gpt-4o", "b", at);
        assert!(a.id < b.id);
        assert_eq!(repo.previous_for(&b).unwrap().unwrap().id, a.id);
        assert!(repo.previous_for(&a).unwrap().is_none());
    }

    #[test]
    fn latest_for_limits_and_orders() {
        let fx = Fixture::new();
        let repo = SnapshotRepo::new(fx.db.clone());
        let t0 = Utc::now() - Duration::hours(3);
        for i in 0..3 {
            fx.snapshot_at("gemini-2.0-flash", &format!("v{i}"), t0 + Duration::hours(i));
        }
        let latest = repo.latest_for(&fx.event_id, "gemini-2.0-flash", 2).unwrap();
        let texts: Vec<&str> = latest.iter().map(|s| s.response_text.as_str()).collect();
        assert_eq!(texts, vec!["v2", "v1"]);
        assert!(repo.latest_for(&fx.event_id, "gpt-4o", 5).unwrap().is_empty());
    }

    #[test]
    fn serialization_omits_embedding() {
        let fx = Fixture::new();
        let repo = SnapshotRepo::new(fx.db.clone());
        let snap = fx.snapshot("gpt-4o", "text");
        repo.set_embedding(&snap.id, &[1.0]).unwrap();
        let json = serde_json::to_value(repo.get(&snap.id).unwrap()).unwrap();
        assert!(json.get("embedding").is_none());
        assert_eq!(json["model_id"], "gpt-4o");
    }
}
