//! Provider registry.
//!
//! The single authoritative collection of provider descriptors. Registered
//! once at startup, then shared read-only across concurrent runs; health
//! snapshots are the only mutable state and live inside each provider.

use std::sync::Arc;

use crate::config::Settings;

use super::ollama::OllamaProvider;
use super::remote::RemoteProvider;
use super::{ModelProvider, ProviderDescriptor};

#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry implied by the settings: the local Ollama text
    /// model, its vision sibling, and the remote endpoint when configured.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(OllamaProvider::new(
            "ollama",
            &settings.ollama_base_url,
            &settings.ollama_model,
            settings.max_context_tokens,
            false,
            settings.request_timeout_secs,
        )));
        registry.register(Arc::new(
            OllamaProvider::new(
                "ollama-vision",
                &settings.ollama_base_url,
                &settings.ollama_vision_model,
                settings.max_context_tokens,
                true,
                settings.request_timeout_secs,
            ),
        ));

        if let Some(remote_url) = &settings.remote_base_url {
            registry.register(Arc::new(RemoteProvider::new(
                "remote",
                remote_url,
                &settings.remote_model,
                settings.remote_api_key.clone(),
                settings.max_context_tokens,
                settings.request_timeout_secs,
            )));
        }

        registry
    }

    /// Register a provider. Registration order defines the default
    /// preference order. A duplicate name replaces the earlier entry.
    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        let name = provider.describe().name;
        self.providers.retain(|p| p.describe().name != name);
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers
            .iter()
            .find(|p| p.describe().name == name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.describe().name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Point-in-time descriptor snapshots for all registered providers.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.providers.iter().map(|p| p.describe()).collect()
    }

    /// Probe every provider and return (name, healthy) pairs.
    /// The only operation besides invoke/benchmark that touches health state.
    pub fn refresh_health(&self) -> Vec<(String, bool)> {
        self.providers
            .iter()
            .map(|p| {
                let name = p.describe().name;
                let ok = p.health_check();
                tracing::debug!(provider = %name, ok, "health refresh");
                (name, ok)
            })
            .collect()
    }
}
