use driftwatch_settings::ProviderKind;

/// Known model and the family that serves it.
#[derive(Clone, Debug)]
pub struct ModelInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub provider: ProviderKind,
    pub max_output: u32,
}

pub static CLAUDE_SONNET_4: ModelInfo = ModelInfo {
    name: "claude-sonnet-4-20250514",
    display_name: "Claude Sonnet 4",
    provider: ProviderKind::Anthropic,
    max_output: 64_000,
};

pub static GPT_4O: ModelInfo = ModelInfo {
    name: "gpt-4o",
    display_name: "GPT-4o",
    provider: ProviderKind::Openai,
    max_output: 16_384,
};

pub static GPT_4O_MINI: ModelInfo = ModelInfo {
    name: "gpt-4o-mini",
    display_name: "GPT-4o mini",
    provider: ProviderKind::Openai,
    max_output: 16_384,
};

pub static GROK_3: ModelInfo = ModelInfo {
    name: "grok-3",
    display_name: "Grok 3",
    provider: ProviderKind::Xai,
    max_output: 131_072,
};

pub static GEMINI_2_0_FLASH: ModelInfo = ModelInfo {
    name: "gemini-2.0-flash",
    display_name: "Gemini 2.0 Flash",
    provider: ProviderKind::Google,
    max_output: 8_192,
};

pub static ALL_MODELS: &[&ModelInfo] = &[
    &CLAUDE_SONNET_4,
    &GPT_4O,
    &GPT_4O_MINI,
    &GROK_3,
    &GEMINI_2_0_FLASH,
];

pub fn find_model(name: &str) -> Option<&'static ModelInfo> {
    ALL_MODELS.iter().find(|m| m.name == name).copied()
}

/// Public API root for a provider family.
pub fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Anthropic => "https://api.anthropic.com",
        ProviderKind::Openai => "https://api.openai.com",
        ProviderKind::Xai => "https://api.x.ai",
        ProviderKind::Google => "https://generativelanguage.googleapis.com",
    }
}

/// Clamp a requested output budget to the model's ceiling, when known.
pub fn clamp_output_tokens(model: &str, requested: u32) -> u32 {
    find_model(model).map_or(requested, |m| requested.min(m.max_output))
}
