//! Registry of concrete providers, filled once at startup

use crate::agent::SignalProvider;
use crate::config::{ConfigError, ConsensusConfig};
use common::ProviderWeight;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Providers by id; the orchestrator resolves configured weights against it
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SignalProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any earlier one with the same id
    pub fn register(&mut self, provider: Arc<dyn SignalProvider>) -> &mut Self {
        let id = provider.provider_id().to_string();
        info!("Registering provider: {}", id);
        if self.providers.insert(id.clone(), provider).is_some() {
            warn!("Provider {} was already registered, replaced", id);
        }
        self
    }

    pub fn with(mut self, provider: Arc<dyn SignalProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn SignalProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Check that every configured provider is registered
    pub fn check(&self, config: &ConsensusConfig) -> Result<(), ConfigError> {
        for provider in &config.providers {
            if !self.providers.contains_key(&provider.provider_id) {
                return Err(ConfigError::UnknownProvider(provider.provider_id.clone()));
            }
        }
        Ok(())
    }

    /// Pair each active configured weight with its provider, in config order
    pub fn resolve(
        &self,
        config: &ConsensusConfig,
    ) -> Result<Vec<(ProviderWeight, Arc<dyn SignalProvider>)>, ConfigError> {
        config
            .active_providers()
            .map(|weight| {
                self.get(&weight.provider_id)
                    .map(|provider| (weight.clone(), provider))
                    .ok_or_else(|| ConfigError::UnknownProvider(weight.provider_id.clone()))
            })
            .collect()
    }
}
