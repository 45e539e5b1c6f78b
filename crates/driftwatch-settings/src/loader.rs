//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::DriftwatchSettings;

/// Root data directory (`~/.driftwatch`).
pub fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".driftwatch")
}

/// Resolve the path to the settings file (`~/.driftwatch/settings.json`).
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Resolve a configured path; relative paths land under [`data_dir`].
pub fn resolve_path(configured: &str) -> PathBuf {
    let path = PathBuf::from(configured);
    if path.is_absolute() {
        path
    } else {
        data_dir().join(path)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DriftwatchSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<DriftwatchSettings> {
    let defaults = serde_json::to_value(DriftwatchSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: DriftwatchSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

fn validate(settings: &DriftwatchSettings) -> Result<()> {
    if settings.polling.max_concurrent_cycles == 0 {
        return Err(SettingsError::InvalidValue(
            "polling.maxConcurrentCycles must be at least 1".into(),
        ));
    }
    if settings.polling.tick_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "polling.tickIntervalSecs must be at least 1".into(),
        ));
    }
    if settings.embeddings.dimensions == 0 {
        return Err(SettingsError::InvalidValue(
            "embeddings.dimensions must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Apply `DRIFTWATCH_*` environment overrides.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut DriftwatchSettings) {
    if let Some(v) = read_env_string("DRIFTWATCH_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("DRIFTWATCH_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("DRIFTWATCH_DB") {
        settings.database.path = v;
    }
    if let Some(v) = read_env_u64("DRIFTWATCH_TICK_INTERVAL_SECS", 10, 86_400) {
        settings.polling.tick_interval_secs = v;
    }
    if let Some(v) = read_env_usize("DRIFTWATCH_MAX_CONCURRENT_CYCLES", 1, 64) {
        settings.polling.max_concurrent_cycles = v;
    }
    if let Some(v) = read_env_u64("DRIFTWATCH_MAX_RETRIES", 0, 10) {
        settings.polling.max_retries = v as u32;
    }
    if let Some(v) = read_env_u64("DRIFTWATCH_PROVIDER_TIMEOUT_SECS", 1, 3_600) {
        settings.polling.provider_timeout_secs = v;
    }
    if let Some(v) = read_env_u64("DRIFTWATCH_STEP_TIMEOUT_SECS", 1, 3_600) {
        settings.polling.step_timeout_secs = v;
    }
    if let Some(v) = read_env_string("DRIFTWATCH_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("DRIFTWATCH_LOG_TO_SQLITE") {
        settings.logging.log_to_sqlite = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"polling": {"maxRetries": 2, "tickIntervalSecs": 900}});
        let source = serde_json::json!({"polling": {"maxRetries": 5}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["polling"]["maxRetries"], 5);
        assert_eq!(merged["polling"]["tickIntervalSecs"], 900);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"providers": [1, 2, 3]});
        let source = serde_json::json!({"providers": [4]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["providers"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.providers.len(), 4);
        assert_eq!(settings.polling.max_concurrent_cycles, 2);
    }

    #[test]
    fn file_overrides_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "polling": {"maxConcurrentCycles": 4},
                "providers": [{"provider": "anthropic", "model": "claude-opus-4-1"}]
            }"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.polling.max_concurrent_cycles, 4);
        assert_eq!(settings.polling.max_retries, 2);
        assert_eq!(settings.providers.len(), 1);
        assert_eq!(settings.providers[0].provider, ProviderKind::Anthropic);
        assert_eq!(settings.providers[0].model, "claude-opus-4-1");
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"polling": {"maxConcurrentCycles": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("5", 10, 100), None);
        assert_eq!(parse_usize_range("3", 1, 64), Some(3));
        assert_eq!(parse_usize_range("abc", 1, 64), None);
    }

    #[test]
    fn resolve_relative_and_absolute() {
        assert!(resolve_path("database/x.db").ends_with(".driftwatch/database/x.db"));
        assert_eq!(resolve_path("/var/lib/x.db"), PathBuf::from("/var/lib/x.db"));
    }
}
