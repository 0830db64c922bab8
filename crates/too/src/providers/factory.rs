use std::collections::HashMap;

use strum::IntoEnumIterator;

use super::{
    anthropic::AnthropicProvider,
    base::Provider,
    configs::{Profile, ProviderConfig, ProviderId},
    google::GoogleProvider,
    ollama::OllamaProvider,
    openai::OpenAiProvider,
    openrouter::OpenRouterProvider,
};
use crate::errors::{ProviderError, ProviderResult};

/// Builds a provider from its resolved settings, without touching the network
pub type ProviderConstructor = fn(ProviderConfig) -> ProviderResult<Box<dyn Provider>>;

fn anthropic(config: ProviderConfig) -> ProviderResult<Box<dyn Provider>> {
    Ok(Box::new(AnthropicProvider::new(config)?))
}

fn openai(config: ProviderConfig) -> ProviderResult<Box<dyn Provider>> {
    Ok(Box::new(OpenAiProvider::new(config)?))
}

fn google(config: ProviderConfig) -> ProviderResult<Box<dyn Provider>> {
    Ok(Box::new(GoogleProvider::new(config)?))
}

fn openrouter(config: ProviderConfig) -> ProviderResult<Box<dyn Provider>> {
    Ok(Box::new(OpenRouterProvider::new(config)?))
}

fn ollama(config: ProviderConfig) -> ProviderResult<Box<dyn Provider>> {
    Ok(Box::new(OllamaProvider::new(config)?))
}

/// Maps provider ids to constructors and builds providers from a profile
pub struct ProviderFactory {
    profile: Profile,
    registry: HashMap<ProviderId, ProviderConstructor>,
}

impl ProviderFactory {
    pub fn new(profile: Profile) -> Self {
        let mut factory = Self {
            profile,
            registry: HashMap::new(),
        };
        factory.register(ProviderId::Anthropic, anthropic);
        factory.register(ProviderId::OpenAi, openai);
        factory.register(ProviderId::Google, google);
        factory.register(ProviderId::OpenRouter, openrouter);
        factory.register(ProviderId::Ollama, ollama);
        factory
    }

    /// Add a constructor, replacing any existing one for the id
    pub fn register(&mut self, id: ProviderId, constructor: ProviderConstructor) {
        self.registry.insert(id, constructor);
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Build a provider, defaulting to the profile's default provider
    pub fn create(&self, id: Option<ProviderId>) -> ProviderResult<Box<dyn Provider>> {
        let id = id.unwrap_or(self.profile.provider);
        let settings = self
            .profile
            .settings(id)
            .ok_or_else(|| ProviderError::config(id, "provider is not configured"))?;
        let constructor = self
            .registry
            .get(&id)
            .ok_or_else(|| ProviderError::config(id, "no constructor is registered"))?;

        let config = settings.resolve(id)?;
        tracing::debug!(provider = %id, model = %config.model, "creating provider");
        constructor(config)
    }

    /// Whether the profile carries a usable block for the provider
    pub fn is_configured(&self, id: ProviderId) -> bool {
        self.profile
            .settings(id)
            .is_some_and(|settings| settings.has_credentials(id))
    }

    pub fn supported_providers(&self) -> Vec<ProviderId> {
        ProviderId::iter().collect()
    }
}
