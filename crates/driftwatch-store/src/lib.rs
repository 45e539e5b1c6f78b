//! SQLite persistence for events, poll cycles, snapshots and derived signals.
//!
//! Every table has its own repository type built over a shared [`Database`].
//! Rows are append-only apart from `events.last_polled_at` and the
//! status/completion columns of `poll_cycles`.

pub mod context_rejections;
pub mod database;
pub mod drift_scores;
pub mod error;
pub mod events;
pub mod facts;
pub mod memory_holes;
pub mod poll_cycles;
pub mod row_helpers;
pub mod schema;
pub mod search_results;
pub mod snapshots;
pub mod sources;
pub mod vectors;

pub use context_rejections::{ContextRejectionRepo, ContextRejectionRow, NewContextRejection};
pub use database::Database;
pub use drift_scores::{DriftScoreRepo, DriftScoreRow, NewDriftScore};
pub use error::StoreError;
pub use events::{EventRepo, EventRow, EventStatus, NewEvent};
pub use facts::{FactNodeRow, FactRepo, NewFactNode};
pub use memory_holes::{MemoryHoleRepo, MemoryHoleRow, NewMemoryHole};
pub use poll_cycles::{CycleStatus, PollCycleRepo, PollCycleRow};
pub use search_results::{NewSearchResult, SearchResultRepo, SearchResultRow};
pub use snapshots::{NewSnapshot, SnapshotRepo, SnapshotRow};
pub use sources::{SourceRepo, SourceRow};
