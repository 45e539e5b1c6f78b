//! Derived signals computed from embedded snapshots.

pub mod context_rejection;
pub mod drift;
pub mod memory_hole;

pub use context_rejection::{is_rejected, ContextRejectionDetector, REJECTION_THRESHOLD};
pub use drift::{measure_drift, same_source_set, DriftAnalyzer, DriftMeasurement};
pub use memory_hole::{find_vanished, MemoryHoleDetector, VanishedFact, MEMORY_HOLE_THRESHOLD};
