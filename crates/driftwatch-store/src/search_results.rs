use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use driftwatch_core::ids::{EventId, PollCycleId, SearchResultId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_timestamp};

/// A grounding search hit captured for one poll cycle.
#[derive(Clone, Debug, Serialize)]
pub struct SearchResultRow {
    pub id: SearchResultId,
    pub poll_cycle_id: PollCycleId,
    pub event_id: EventId,
    pub query: String,
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
    pub published_date: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewSearchResult {
    pub poll_cycle_id: PollCycleId,
    pub event_id: EventId,
    pub query: String,
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
    pub published_date: Option<String>,
}

const SEARCH_COLUMNS: &str =
    "id, poll_cycle_id, event_id, query, title, url, content, score, published_date, created_at";

pub struct SearchResultRepo {
    db: Database,
}

impl SearchResultRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, new), fields(poll_cycle_id = %new.poll_cycle_id))]
    pub fn create(&self, new: &NewSearchResult) -> Result<SearchResultRow, StoreError> {
        let id = SearchResultId::new();
        let created_at = Utc::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO search_results
                 (id, poll_cycle_id, event_id, query, title, url, content,
                  score, published_date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    id.as_str(),
                    new.poll_cycle_id.as_str(),
                    new.event_id.as_str(),
                    new.query,
                    new.title,
                    new.url,
                    new.content,
                    new.score,
                    new.published_date,
                    fmt_timestamp(&created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(SearchResultRow {
            id,
            poll_cycle_id: new.poll_cycle_id.clone(),
            event_id: new.event_id.clone(),
            query: new.query.clone(),
            title: new.title.clone(),
            url: new.url.clone(),
            content: new.content.clone(),
            score: new.score,
            published_date: new.published_date.clone(),
            created_at,
        })
    }

    /// Results of one cycle in the order the search returned them.
    #[instrument(skip(self), fields(poll_cycle_id = %poll_cycle_id))]
    pub fn list_for_cycle(
        &self,
        poll_cycle_id: &PollCycleId,
    ) -> Result<Vec<SearchResultRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SEARCH_COLUMNS} FROM search_results WHERE poll_cycle_id = ?1
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let mut rows = stmt.query([poll_cycle_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_search_result(row)?);
            }
            Ok(results)
        })
    }

    /// Results for an event, newest first.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn list_for_event(
        &self,
        event_id: &EventId,
        limit: u32,
    ) -> Result<Vec<SearchResultRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SEARCH_COLUMNS} FROM search_results WHERE event_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![event_id.as_str(), limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_search_result(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_search_result(row: &rusqlite::Row<'_>) -> Result<SearchResultRow, StoreError> {
    const T: &str = "search_results";
    Ok(SearchResultRow {
        id: SearchResultId::from_raw(row_helpers::get::<String>(row, 0, T, "id")?),
        poll_cycle_id: PollCycleId::from_raw(row_helpers::get::<String>(
            row,
            1,
            T,
            "poll_cycle_id",
        )?),
        event_id: EventId::from_raw(row_helpers::get::<String>(row, 2, T, "event_id")?),
        query: row_helpers::get(row, 3, T, "query")?,
        title: row_helpers::get(row, 4, T, "title")?,
        url: row_helpers::get(row, 5, T, "url")?,
        content: row_helpers::get(row, 6, T, "content")?,
        score: row_helpers::get(row, 7, T, "score")?,
        published_date: row_helpers::get_opt(row, 8, T, "published_date")?,
        created_at: row_helpers::get_timestamp(row, 9, T, "created_at")?,
    })
}
