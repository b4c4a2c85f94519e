//! Immutable table of configured identity providers.

use crate::config::{OidcConfig, ProviderConfig};
use crate::discovery::discover;
use crate::error::{OidcError, OidcResult};
use crate::http::UpstreamHttp;
use std::collections::HashMap;
use tracing::info;

/// Provider lookup by name. Built once at startup and never mutated.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    /// Validate and index provider configs. Every config must already carry
    /// its endpoints (explicitly or through a preset).
    pub fn new(
        configs: impl IntoIterator<Item = ProviderConfig>,
        callback_base_url: &str,
    ) -> OidcResult<Self> {
        let mut providers = HashMap::new();

        for config in configs {
            let config = config.normalize(callback_base_url)?;
            if providers.contains_key(&config.name) {
                return Err(OidcError::Config(format!(
                    "provider '{}' is configured twice",
                    config.name
                )));
            }
            providers.insert(config.name.clone(), config);
        }

        Ok(Self { providers })
    }

    /// Run discovery for providers that have a `discovery_url`, then build
    /// the registry.
    pub async fn resolve(config: &OidcConfig, http: &UpstreamHttp) -> OidcResult<Self> {
        let mut resolved = Vec::with_capacity(config.providers.len());

        for (name, provider) in &config.providers {
            let mut provider = provider.clone();
            if provider.name.is_empty() {
                provider.name = name.clone();
            }
            if let Some(url) = provider.discovery_url.clone() {
                let document = discover(http, &url).await?;
                provider.merge_discovery(&document);
                info!(
                    provider = %provider.name,
                    issuer = %provider.issuer,
                    "Resolved provider via discovery"
                );
            }
            resolved.push(provider);
        }

        Self::new(resolved, &config.callback_base_url)
    }

    pub fn lookup(&self, name: &str) -> OidcResult<&ProviderConfig> {
        self.providers
            .get(name)
            .ok_or_else(|| OidcError::ProviderNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
