use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::{ProviderError, ProviderResult};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderId {
    #[default]
    Anthropic,
    OpenAi,
    Google,
    OpenRouter,
    Ollama,
}

impl ProviderId {
    pub fn default_host(&self) -> &'static str {
        match self {
            ProviderId::Anthropic => "https://api.anthropic.com",
            ProviderId::OpenAi => "https://api.openai.com",
            ProviderId::Google => "https://generativelanguage.googleapis.com",
            ProviderId::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderId::Ollama => "http://localhost:11434",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderId::Anthropic => "claude-3-5-sonnet-20241022",
            ProviderId::OpenAi => "gpt-4-turbo",
            ProviderId::Google => "gemini-1.5-pro",
            ProviderId::OpenRouter => "anthropic/claude-3.5-sonnet",
            ProviderId::Ollama => "llama3",
        }
    }

    pub fn default_max_tokens(&self) -> u32 {
        match self {
            ProviderId::OpenAi | ProviderId::Ollama => 4096,
            ProviderId::Anthropic | ProviderId::Google | ProviderId::OpenRouter => 8192,
        }
    }

    /// Local models run without credentials
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderId::Ollama)
    }
}

/// One provider block of the configuration profile, as written by the user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderSettings {
    /// Whether the block carries everything the provider needs to authenticate
    pub fn has_credentials(&self, id: ProviderId) -> bool {
        !id.requires_api_key() || self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    /// Fill in the provider defaults, failing if credentials are missing
    pub fn resolve(&self, id: ProviderId) -> ProviderResult<ProviderConfig> {
        if !self.has_credentials(id) {
            return Err(ProviderError::config(id, "an api_key is required"));
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ProviderError::config(
                    id,
                    format!("temperature {} is outside 0.0..=2.0", temperature),
                ));
            }
        }

        Ok(ProviderConfig {
            host: self
                .base_url
                .clone()
                .unwrap_or_else(|| id.default_host().to_string()),
            api_key: self.api_key.clone().unwrap_or_default(),
            model: self
                .model
                .clone()
                .unwrap_or_else(|| id.default_model().to_string()),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.max_tokens.unwrap_or_else(|| id.default_max_tokens()),
        })
    }
}

/// Settings a provider is constructed from, with every default applied
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ProviderConfig {
    /// Join the host and an endpoint path
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.host.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// The configuration profile: which provider to use by default and how to reach each one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub provider: ProviderId,
    #[serde(default)]
    pub providers: HashMap<ProviderId, ProviderSettings>,
}

impl Profile {
    pub fn with_provider(mut self, id: ProviderId, settings: ProviderSettings) -> Self {
        self.providers.insert(id, settings);
        self
    }

    pub fn settings(&self, id: ProviderId) -> Option<&ProviderSettings> {
        self.providers.get(&id)
    }
}
