use secrecy::SecretString;

use crate::types::ProviderKind;

/// API keys and shared secrets, read from the environment only.
#[derive(Clone, Default)]
pub struct ApiKeys {
    pub anthropic: Option<SecretString>,
    pub openai: Option<SecretString>,
    pub xai: Option<SecretString>,
    pub google: Option<SecretString>,
    pub tavily: Option<SecretString>,
    /// Bearer token required by the cron trigger endpoint, when set.
    pub cron_secret: Option<SecretString>,
}

impl ApiKeys {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from)
        };
        Self {
            anthropic: read("ANTHROPIC_API_KEY"),
            openai: read("OPENAI_API_KEY"),
            xai: read("XAI_API_KEY"),
            google: read("GOOGLE_GENERATIVE_AI_API_KEY"),
            tavily: read("TAVILY_API_KEY"),
            cron_secret: read("CRON_SECRET"),
        }
    }

    pub fn for_provider(&self, kind: ProviderKind) -> Option<&SecretString> {
        match kind {
            ProviderKind::Anthropic => self.anthropic.as_ref(),
            ProviderKind::Openai => self.openai.as_ref(),
            ProviderKind::Xai => self.xai.as_ref(),
            ProviderKind::Google => self.google.as_ref(),
        }
    }
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("anthropic", &self.anthropic.is_some())
            .field("openai", &self.openai.is_some())
            .field("xai", &self.xai.is_some())
            .field("google", &self.google.is_some())
            .field("tavily", &self.tavily.is_some())
            .field("cron_secret", &self.cron_secret.is_some())
            .finish()
    }
}
