//! HTTP surface: health, cron and manual poll triggers, event timelines.

pub mod error;
pub mod handlers;
pub mod health;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, DriftwatchServer, ServerConfig};
