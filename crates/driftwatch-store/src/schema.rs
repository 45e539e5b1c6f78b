/// SQL DDL for the driftwatch database.
/// Timestamps are RFC 3339 UTC with microseconds, so text order is time order.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    description TEXT,
    prompt_template TEXT NOT NULL,
    search_query TEXT,
    drift_threshold REAL NOT NULL DEFAULT 0.05,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_polled_at TEXT
);

CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL REFERENCES events(id),
    title TEXT NOT NULL,
    url TEXT,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    added_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS poll_cycles (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL REFERENCES events(id),
    frozen_source_ids TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    started_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS snapshots (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL REFERENCES events(id),
    poll_cycle_id TEXT NOT NULL REFERENCES poll_cycles(id),
    model_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    prompt_used TEXT NOT NULL,
    response_text TEXT NOT NULL,
    embedding BLOB,
    token_count INTEGER,
    created_at TEXT NOT NULL,
    UNIQUE (poll_cycle_id, model_id)
);

CREATE TABLE IF NOT EXISTS fact_nodes (
    id TEXT PRIMARY KEY,
    snapshot_id TEXT NOT NULL REFERENCES snapshots(id),
    event_id TEXT NOT NULL REFERENCES events(id),
    claim TEXT NOT NULL,
    claim_embedding BLOB,
    confidence REAL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS drift_scores (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL REFERENCES events(id),
    snapshot_id TEXT NOT NULL REFERENCES snapshots(id),
    previous_snapshot_id TEXT NOT NULL REFERENCES snapshots(id),
    cosine_similarity REAL NOT NULL,
    drift_magnitude REAL NOT NULL,
    ghost_pivot INTEGER NOT NULL DEFAULT 0,
    explanation TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memory_holes (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL REFERENCES events(id),
    fact_node_id TEXT NOT NULL REFERENCES fact_nodes(id),
    last_seen_snapshot_id TEXT NOT NULL REFERENCES snapshots(id),
    missing_from_snapshot_id TEXT NOT NULL REFERENCES snapshots(id),
    best_similarity REAL NOT NULL,
    detected_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS search_results (
    id TEXT PRIMARY KEY,
    poll_cycle_id TEXT NOT NULL REFERENCES poll_cycles(id),
    event_id TEXT NOT NULL REFERENCES events(id),
    query TEXT NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    content TEXT NOT NULL,
    score REAL NOT NULL,
    published_date TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS context_rejections (
    id TEXT PRIMARY KEY,
    snapshot_id TEXT NOT NULL REFERENCES snapshots(id),
    event_id TEXT NOT NULL REFERENCES events(id),
    search_result_id TEXT NOT NULL REFERENCES search_results(id),
    provided_fact TEXT NOT NULL,
    rejected INTEGER NOT NULL,
    similarity REAL NOT NULL,
    detected_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_status ON events(status);
CREATE INDEX IF NOT EXISTS idx_sources_event ON sources(event_id, is_active);
CREATE INDEX IF NOT EXISTS idx_cycles_event ON poll_cycles(event_id, started_at);
CREATE INDEX IF NOT EXISTS idx_cycles_status ON poll_cycles(status);
CREATE INDEX IF NOT EXISTS idx_snapshots_event_model ON snapshots(event_id, model_id, created_at);
CREATE INDEX IF NOT EXISTS idx_facts_snapshot ON fact_nodes(snapshot_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_drift_pair ON drift_scores(snapshot_id, previous_snapshot_id);
CREATE INDEX IF NOT EXISTS idx_drift_event ON drift_scores(event_id, created_at);
CREATE INDEX IF NOT EXISTS idx_holes_event ON memory_holes(event_id, detected_at);
CREATE INDEX IF NOT EXISTS idx_search_cycle ON search_results(poll_cycle_id);
CREATE INDEX IF NOT EXISTS idx_rejections_snapshot ON context_rejections(snapshot_id);
CREATE INDEX IF NOT EXISTS idx_rejections_event ON context_rejections(event_id, detected_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
