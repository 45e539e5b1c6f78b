//! Layered configuration for driftwatch.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`DriftwatchSettings::default()`]
//! 2. **User file**: `~/.driftwatch/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `DRIFTWATCH_*` overrides (highest priority)
//!
//! API keys never live in the settings file; see [`secrets::ApiKeys`].

pub mod errors;
pub mod loader;
pub mod secrets;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use secrets::ApiKeys;
pub use types::*;
