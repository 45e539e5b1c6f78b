use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriftwatchSettings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub polling: PollingSettings,
    pub providers: Vec<ProviderSettings>,
    pub analysis: AnalysisSettings,
    pub embeddings: EmbeddingSettings,
    pub search: SearchSettings,
    pub logging: LoggingSettings,
}

impl Default for DriftwatchSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            database: DatabaseSettings::default(),
            polling: PollingSettings::default(),
            providers: default_providers(),
            analysis: AnalysisSettings::default(),
            embeddings: EmbeddingSettings::default(),
            search: SearchSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Request timeout for inline (`poll-direct`) requests, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9191,
            request_timeout_secs: 180,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Path to the SQLite database (relative paths resolve under `~/.driftwatch`).
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "database/driftwatch.db".to_string(),
        }
    }
}

/// Scheduling and fan-out settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollingSettings {
    /// Outer dispatcher cadence.
    pub tick_interval_secs: u64,
    /// Ceiling on concurrently running poll cycles, system-wide.
    pub max_concurrent_cycles: usize,
    /// Retries of a whole orchestration after an unhandled failure.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Budget for a single provider query.
    pub provider_timeout_secs: u64,
    /// Budget for each auxiliary call of a cycle: search grounding, fact
    /// extraction, embeddings and ghost-pivot explanations.
    pub step_timeout_secs: u64,
    /// Cycles left `running` longer than this are marked `failed`.
    pub stale_cycle_after_secs: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 15 * 60,
            max_concurrent_cycles: 2,
            max_retries: 2,
            retry_base_delay_ms: 2_000,
            provider_timeout_secs: 120,
            step_timeout_secs: 60,
            stale_cycle_after_secs: 30 * 60,
        }
    }
}

/// Model provider family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    Xai,
    Google,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Xai => "xai",
            Self::Google => "google",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One polled model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Override for the provider's API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderSettings {
    pub fn new(provider: ProviderKind, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
            enabled: true,
            max_output_tokens: default_max_output_tokens(),
            base_url: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_output_tokens() -> u32 {
    2000
}

/// The four polled models.
pub fn default_providers() -> Vec<ProviderSettings> {
    vec![
        ProviderSettings::new(ProviderKind::Anthropic, "claude-sonnet-4-20250514"),
        ProviderSettings::new(ProviderKind::Openai, "gpt-4o"),
        ProviderSettings::new(ProviderKind::Xai, "grok-3"),
        ProviderSettings::new(ProviderKind::Google, "gemini-2.0-flash"),
    ]
}

/// Secondary model used for fact extraction and ghost-pivot explanations.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub key_fact_max_output_tokens: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Openai,
            model: "gpt-4o-mini".to_string(),
            key_fact_max_output_tokens: 500,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingSettings {
    pub model: String,
    pub dimensions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            base_url: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchSettings {
    pub max_results: u32,
    pub search_depth: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_results: 10,
            search_depth: "advanced".to_string(),
            base_url: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    /// Persist warn+ events to SQLite.
    pub log_to_sqlite: bool,
    pub log_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_sqlite: true,
            log_db_path: "database/logs.db".to_string(),
        }
    }
}
