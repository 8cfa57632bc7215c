//! Provider registry: configured provider names to lazily built providers.

use crate::api::{AiConfig, Capability};
use crate::error::{AiError, Result};
use crate::events::EventBus;
use crate::failover::ProviderResolver;
use crate::instrumentation::instrument;
use crate::provider::Provider;
use crate::traits::{ProviderContext, ProviderDriver};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Owns the configuration and the registered drivers, and caches every
/// provider it builds for its own lifetime.
pub struct ProviderRegistry {
    config: AiConfig,
    drivers: HashMap<String, Arc<dyn ProviderDriver>>,
    providers: RwLock<HashMap<String, Provider>>,
    events: EventBus,
}

impl ProviderRegistry {
    /// Validate `config` against the registered drivers.
    pub fn new(
        config: AiConfig,
        drivers: HashMap<String, Arc<dyn ProviderDriver>>,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;
        for (name, provider) in &config.providers {
            if !drivers.contains_key(&provider.driver) {
                return Err(AiError::Config(format!(
                    "Unsupported driver [{}] for provider [{}]",
                    provider.driver, name
                )));
            }
        }
        Ok(Self {
            config,
            drivers,
            providers: RwLock::new(HashMap::new()),
            events,
        })
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn contains(&self, name: &str) -> bool {
        self.config.providers.contains_key(name)
    }

    /// The configured default provider for `capability`.
    pub fn default_provider_name(&self, capability: Capability) -> Result<&str> {
        self.config.default_provider(capability).ok_or_else(|| {
            AiError::Config(format!(
                "No default provider is configured for {}.",
                capability.description()
            ))
        })
    }

    /// The provider named `name`, building and caching it on first use.
    #[tracing::instrument(skip(self), fields(driver))]
    pub async fn provider(&self, name: &str) -> Result<Provider> {
        // Fast path: already built
        {
            let providers = self.providers.read().await;
            if let Some(provider) = providers.get(name) {
                return Ok(provider.clone());
            }
        }

        let mut providers = self.providers.write().await;
        if let Some(provider) = providers.get(name) {
            return Ok(provider.clone());
        }

        let config = self
            .config
            .providers
            .get(name)
            .ok_or_else(|| AiError::Config(format!("Provider [{}] is not defined.", name)))?;
        let driver = self.drivers.get(&config.driver).ok_or_else(|| {
            AiError::Config(format!(
                "Unsupported driver [{}] for provider [{}]",
                config.driver, name
            ))
        })?;
        tracing::Span::current().record("driver", config.driver.as_str());

        let mut context = ProviderContext::from_config(name, config);
        if context.key.is_none()
            && let Some(var) = &config.key_env
        {
            context.key = std::env::var(var).ok();
        }

        tracing::info!(provider = %name, driver = %config.driver, "Instantiating provider");
        let gateways = match driver.create(&context) {
            Ok(gateways) => gateways,
            Err(e) => {
                tracing::error!(provider = %name, error = %e, "Provider instantiation failed");
                return Err(e);
            }
        };
        metrics::counter!("ai_provider.instantiations", "driver" => config.driver.clone())
            .increment(1);

        let provider = Provider::new(
            context,
            driver.defaults().merged(&config.models),
            instrument(gateways),
            self.events.clone(),
        );
        providers.insert(name.to_string(), provider.clone());
        Ok(provider)
    }

    /// The provider named `name`, checked for `capability`.
    pub async fn provider_for(&self, name: &str, capability: Capability) -> Result<Provider> {
        let provider = self.provider(name).await?;
        provider.ensure_supports(capability)?;
        Ok(provider)
    }

    /// Build every configured provider now rather than on first use.
    pub async fn instantiate_all(&self) -> Result<()> {
        let names: Vec<String> = self.config.providers.keys().cloned().collect();
        for name in names {
            self.provider(&name).await?;
        }
        Ok(())
    }

    /// Names of providers built so far.
    pub async fn instantiated(&self) -> Vec<String> {
        let providers = self.providers.read().await;
        let mut names: Vec<String> = providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ProviderResolver for ProviderRegistry {
    async fn resolve(&self, name: &str, capability: Capability) -> Result<Provider> {
        self.provider_for(name, capability).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ProviderConfig;
    use crate::provider::LoopbackDriver;

    fn registry(config: AiConfig) -> Result<ProviderRegistry> {
        let mut drivers: HashMap<String, Arc<dyn ProviderDriver>> = HashMap::new();
        drivers.insert("loopback".into(), Arc::new(LoopbackDriver));
        ProviderRegistry::new(config, drivers, EventBus::new())
    }

    #[tokio::test]
    async fn providers_are_built_once() {
        let registry = registry(
            AiConfig::new()
                .provider("local", ProviderConfig::new("loopback"))
                .default_for(Capability::Text, "local"),
        )
        .unwrap();

        assert!(registry.instantiated().await.is_empty());
        registry.provider("local").await.unwrap();
        registry.provider("local").await.unwrap();
        assert_eq!(registry.instantiated().await, vec!["local"]);
        assert_eq!(registry.default_provider_name(Capability::Text).unwrap(), "local");
    }

    #[tokio::test]
    async fn capability_checks_happen_at_resolution() {
        let registry = registry(AiConfig::new().provider("local", ProviderConfig::new("loopback"))).unwrap();
        let err = registry.provider_for("local", Capability::Embeddings).await.unwrap_err();
        assert!(matches!(err, AiError::CapabilityMismatch(_)));
        assert!(err.to_string().contains("embedding generation"));
    }

    #[test]
    fn unknown_drivers_are_rejected_up_front() {
        let err = registry(AiConfig::new().provider("x", ProviderConfig::new("nope"))).err().unwrap();
        assert!(err.to_string().contains("Unsupported driver [nope]"));
    }

    #[tokio::test]
    async fn undefined_providers_are_config_errors() {
        let registry = registry(AiConfig::new()).unwrap();
        let err = registry.provider("ghost").await.unwrap_err();
        assert!(matches!(err, AiError::Config(_)));
    }
}
