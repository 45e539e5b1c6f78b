use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::instrument;

use driftwatch_core::ids::{EventId, SourceId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_timestamp};

/// A curated evidence document attached to an event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceRow {
    pub id: SourceId,
    pub event_id: EventId,
    pub title: String,
    pub url: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub is_active: bool,
    pub added_at: DateTime<Utc>,
}

/// SHA-256 of the content, lowercase hex.
pub fn content_hash(content: &str) -> String {
    Sha256::digest(content.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub struct SourceRepo {
    db: Database,
}

impl SourceRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, content), fields(event_id = %event_id))]
    pub fn create(
        &self,
        event_id: &EventId,
        title: &str,
        url: Option<&str>,
        content: &str,
    ) -> Result<SourceRow, StoreError> {
        let row = SourceRow {
            id: SourceId::new(),
            event_id: event_id.clone(),
            title: title.to_string(),
            url: url.map(str::to_string),
            content: content.to_string(),
            content_hash: content_hash(content),
            is_active: true,
            added_at: Utc::now(),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sources
                 (id, event_id, title, url, content, content_hash, is_active, added_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
                rusqlite::params![
                    row.id.as_str(),
                    event_id.as_str(),
                    row.title,
                    row.url,
                    row.content,
                    row.content_hash,
                    fmt_timestamp(&row.added_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(row)
    }

    /// Active sources for an event in insertion order.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn active_for(&self, event_id: &EventId) -> Result<Vec<SourceRow>, StoreError> {
        self.query_for(event_id, "AND is_active = 1")
    }

    /// Every source of an event, active or not, in insertion order.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn list_for_event(&self, event_id: &EventId) -> Result<Vec<SourceRow>, StoreError> {
        self.query_for(event_id, "")
    }

    fn query_for(&self, event_id: &EventId, filter: &str) -> Result<Vec<SourceRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, event_id, title, url, content, content_hash, is_active, added_at
                 FROM sources WHERE event_id = ?1 {filter}
                 ORDER BY added_at ASC, id ASC"
            ))?;
            let mut rows = stmt.query([event_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_source(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(source_id = %id))]
    pub fn set_active(&self, id: &SourceId, active: bool) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sources SET is_active = ?1 WHERE id = ?2",
                rusqlite::params![active, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("source {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_source(row: &rusqlite::Row<'_>) -> Result<SourceRow, StoreError> {
    Ok(SourceRow {
        id: SourceId::from_raw(row_helpers::get::<String>(row, 0, "sources", "id")?),
        event_id: EventId::from_raw(row_helpers::get::<String>(row, 1, "sources", "event_id")?),
        title: row_helpers::get(row, 2, "sources", "title")?,
        url: row_helpers::get_opt(row, 3, "sources", "url")?,
        content: row_helpers::get(row, 4, "sources", "content")?,
        content_hash: row_helpers::get(row, 5, "sources", "content_hash")?,
        is_active: row_helpers::get(row, 6, "sources", "is_active")?,
        added_at: row_helpers::get_timestamp(row, 7, "sources", "added_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventRepo, NewEvent};

    fn setup() -> (SourceRepo, EventId) {
        let db = Database::in_memory().unwrap();
        let event = EventRepo::new(db.clone())
            .create(&NewEvent::new("Harbor Fire", "t"))
            .unwrap();
        (SourceRepo::new(db), event.id)
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn active_subset_in_insertion_order() {
        let (repo, event_id) = setup();
        let a = repo
            .create(&event_id, "Wire report", Some("https://a.example"), "Fire began at 3am.")
            .unwrap();
        let b = repo.create(&event_id, "Statement", None, "Port closed.").unwrap();
        let c = repo.create(&event_id, "Blog", None, "Rumor.").unwrap();
        repo.set_active(&b.id, false).unwrap();

        let active = repo.active_for(&event_id).unwrap();
        let ids: Vec<&SourceId> = active.iter().map(|s| &s.id).collect();
        assert_eq!(ids, vec![&a.id, &c.id]);
        assert_eq!(active[0].url.as_deref(), Some("https://a.example"));
        assert_eq!(active[0].content_hash, content_hash("Fire began at 3am."));
        assert!(active.iter().all(|s| s.is_active));

        let all = repo.list_for_event(&event_id).unwrap();
        assert_eq!(all.len(), 3);
        assert!(!all[1].is_active);
    }

    #[test]
    fn other_events_sources_not_returned() {
        let (repo, event_id) = setup();
        repo.create(&event_id, "Mine", None, "x").unwrap();
        assert!(repo.active_for(&EventId::new()).unwrap().is_empty());
    }

    #[test]
    fn set_active_missing_source() {
        let (repo, _) = setup();
        assert!(matches!(
            repo.set_active(&SourceId::new(), true),
            Err(StoreError::NotFound(_))
        ));
    }
}
