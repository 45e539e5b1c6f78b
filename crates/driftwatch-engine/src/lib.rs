//! Poll scheduling, fan-out orchestration and drift analysis.

pub mod analysis;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod scheduler;
pub mod services;

pub use dispatcher::{backoff_delay, Dispatcher, DispatcherConfig, TickReport};
pub use error::{DispatchError, EngineError};
pub use orchestrator::{PollOrchestrator, PollReport, ProviderOutcome, ProviderStatus, Synthesis};
pub use prompt::build_poll_prompt;
pub use scheduler::{is_due_for_poll, polling_interval, tier_for, PollTier, MIN_COOLDOWN, TIERS};
pub use services::{OrchestratorConfig, Services};
