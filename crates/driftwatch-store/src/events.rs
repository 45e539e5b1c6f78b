use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use driftwatch_core::ids::EventId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, fmt_timestamp};

pub const DEFAULT_DRIFT_THRESHOLD: f64 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Active,
    Paused,
    Archived,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// A tracked real-world event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRow {
    pub id: EventId,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub prompt_template: String,
    pub search_query: Option<String>,
    pub drift_threshold: f64,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl EventRow {
    /// Query used for search grounding.
    pub fn grounding_query(&self) -> &str {
        self.search_query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(&self.title)
    }
}

#[derive(Clone, Debug, Default)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub prompt_template: String,
    pub search_query: Option<String>,
    pub drift_threshold: Option<f64>,
}

impl NewEvent {
    pub fn new(title: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            prompt_template: prompt_template.into(),
            ..Self::default()
        }
    }
}

/// Lowercase ASCII slug: alphanumeric runs joined by single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

const EVENT_COLUMNS: &str = "id, title, slug, description, prompt_template, search_query,
    drift_threshold, status, created_at, updated_at, last_polled_at";

pub struct EventRepo {
    db: Database,
}

impl EventRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create an event stamped with the current time.
    pub fn create(&self, new: &NewEvent) -> Result<EventRow, StoreError> {
        self.create_at(new, Utc::now())
    }

    /// Create an event with an explicit creation time.
    #[instrument(skip(self, new), fields(title = %new.title))]
    pub fn create_at(
        &self,
        new: &NewEvent,
        created_at: DateTime<Utc>,
    ) -> Result<EventRow, StoreError> {
        let slug = slugify(&new.title);
        if slug.is_empty() {
            return Err(StoreError::Conflict(format!(
                "event title {:?} yields an empty slug",
                new.title
            )));
        }
        let row = EventRow {
            id: EventId::new(),
            title: new.title.clone(),
            slug,
            description: new.description.clone(),
            prompt_template: new.prompt_template.clone(),
            search_query: new.search_query.clone(),
            drift_threshold: new.drift_threshold.unwrap_or(DEFAULT_DRIFT_THRESHOLD),
            status: EventStatus::Active,
            created_at,
            updated_at: created_at,
            last_polled_at: None,
        };
        let ts = fmt_timestamp(&created_at);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, title, slug, description, prompt_template, search_query,
                                     drift_threshold, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8, ?9)",
                rusqlite::params![
                    row.id.as_str(),
                    row.title,
                    row.slug,
                    row.description,
                    row.prompt_template,
                    row.search_query,
                    row.drift_threshold,
                    ts,
                    ts,
                ],
            )?;
            Ok(())
        })?;
        Ok(row)
    }

    /// Get an event by ID.
    #[instrument(skip(self), fields(event_id = %id))]
    pub fn get(&self, id: &EventId) -> Result<EventRow, StoreError> {
        self.find(id)?
            .ok_or_else(|| StoreError::NotFound(format!("event {id}")))
    }

    /// Get an event by ID, `None` when absent.
    #[instrument(skip(self), fields(event_id = %id))]
    pub fn find(&self, id: &EventId) -> Result<Option<EventRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_event(row)?)),
                None => Ok(None),
            }
        })
    }

    /// All active events, oldest first.
    #[instrument(skip(self))]
    pub fn list_active(&self) -> Result<Vec<EventRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE status = 'active'
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_event(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(event_id = %id, status = %status))]
    pub fn set_status(&self, id: &EventId, status: EventStatus) -> Result<(), StoreError> {
        let now = fmt_timestamp(&Utc::now());
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE events SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status.to_string(), now, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("event {id}")));
            }
            Ok(())
        })
    }

    /// Stamp `last_polled_at`. Only the poll orchestrator calls this.
    #[instrument(skip(self), fields(event_id = %id))]
    pub fn mark_polled(&self, id: &EventId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let ts = fmt_timestamp(&at);
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE events SET last_polled_at = ?1, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![ts, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("event {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<EventRow, StoreError> {
    let status_str: String = row_helpers::get(row, 7, "events", "status")?;
    Ok(EventRow {
        id: EventId::from_raw(row_helpers::get::<String>(row, 0, "events", "id")?),
        title: row_helpers::get(row, 1, "events", "title")?,
        slug: row_helpers::get(row, 2, "events", "slug")?,
        description: row_helpers::get_opt(row, 3, "events", "description")?,
        prompt_template: row_helpers::get(row, 4, "events", "prompt_template")?,
        search_query: row_helpers::get_opt(row, 5, "events", "search_query")?,
        drift_threshold: row_helpers::get(row, 6, "events", "drift_threshold")?,
        status: row_helpers::parse_enum(&status_str, "events", "status")?,
        created_at: row_helpers::get_timestamp(row, 8, "events", "created_at")?,
        updated_at: row_helpers::get_timestamp(row, 9, "events", "updated_at")?,
        last_polled_at: row_helpers::get_timestamp_opt(row, 10, "events", "last_polled_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup() -> EventRepo {
        EventRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn slug_rules() {
        assert_eq!(slugify("Port Strike: Day 3!"), "port-strike-day-3");
        assert_eq!(slugify("  --Fed rate  decision-- "), "fed-rate-decision");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn create_and_get() {
        let repo = setup();
        let mut new = NewEvent::new("Bridge Collapse", "What happened to the bridge?");
        new.search_query = Some("bridge collapse news".into());
        let created = repo.create(&new).unwrap();

        let fetched = repo.get(&created.id).unwrap();
        assert_eq!(fetched.slug, "bridge-collapse");
        assert_eq!(fetched.status, EventStatus::Active);
        assert_eq!(fetched.drift_threshold, DEFAULT_DRIFT_THRESHOLD);
        assert!(fetched.last_polled_at.is_none());
        assert_eq!(fetched.grounding_query(), "bridge collapse news");
        assert_eq!(fetched.created_at, created.created_at);
    }

    #[test]
    fn grounding_query_falls_back_to_title() {
        let repo = setup();
        let mut new = NewEvent::new("Election Night", "t");
        new.search_query = Some("   ".into());
        let event = repo.create(&new).unwrap();
        assert_eq!(event.grounding_query(), "Election Night");
    }

    #[test]
    fn get_missing_is_not_found() {
        let repo = setup();
        let id = EventId::new();
        assert!(matches!(repo.get(&id), Err(StoreError::NotFound(_))));
        assert!(repo.find(&id).unwrap().is_none());
    }

    #[test]
    fn duplicate_slug_conflicts() {
        let repo = setup();
        repo.create(&NewEvent::new("Heat Wave", "t")).unwrap();
        let err = repo.create(&NewEvent::new("heat wave", "t")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn list_active_excludes_paused_and_archived() {
        let repo = setup();
        let a = repo.create(&NewEvent::new("Alpha", "t")).unwrap();
        let b = repo.create(&NewEvent::new("Beta", "t")).unwrap();
        let c = repo.create(&NewEvent::new("Gamma", "t")).unwrap();
        repo.set_status(&b.id, EventStatus::Paused).unwrap();
        repo.set_status(&c.id, EventStatus::Archived).unwrap();

        let active: Vec<EventId> = repo.list_active().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(active, vec![a.id]);
    }

    #[test]
    fn mark_polled_sets_timestamp() {
        let repo = setup();
        let created_at = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        let event = repo.create_at(&NewEvent::new("Quake", "t"), created_at).unwrap();
        let polled = created_at + chrono::Duration::hours(2);
        repo.mark_polled(&event.id, polled).unwrap();

        let fetched = repo.get(&event.id).unwrap();
        assert_eq!(fetched.last_polled_at, Some(polled));
        assert_eq!(fetched.created_at, created_at);
    }

    #[test]
    fn mark_polled_missing_event() {
        let repo = setup();
        assert!(matches!(
            repo.mark_polled(&EventId::new(), Utc::now()),
            Err(StoreError::NotFound(_))
        ));
    }
}
