//! Ordered provider/model failover.
//!
//! Pairs are attempted strictly in the order given. Only
//! [`AiError::Failoverable`] moves on to the next pair; every other error,
//! including capability mismatches found while resolving a pair, is returned
//! immediately. When every pair fails over, the last error is returned.

use crate::agent::AgentKey;
use crate::api::{Capability, ProviderModelList};
use crate::error::{AiError, Result};
use crate::events::{AiEvent, EventBus};
use crate::provider::Provider;
use async_trait::async_trait;
use std::future::Future;

/// Resolves provider names to capability-checked providers.
#[async_trait]
pub trait ProviderResolver: Send + Sync {
    /// Look up `name`, failing with [`AiError::CapabilityMismatch`] if it
    /// lacks `capability`.
    async fn resolve(&self, name: &str, capability: Capability) -> Result<Provider>;
}

/// One failover run over a list of provider/model pairs.
pub struct Failover<'a> {
    pairs: &'a ProviderModelList,
    capability: Capability,
    agent: Option<AgentKey>,
}

impl<'a> Failover<'a> {
    pub fn new(pairs: &'a ProviderModelList, capability: Capability) -> Self {
        Self {
            pairs,
            capability,
            agent: None,
        }
    }

    /// Report failovers as [`AiEvent::AgentFailedOver`] for this agent.
    pub fn for_agent(mut self, agent: AgentKey) -> Self {
        self.agent = Some(agent);
        self
    }

    fn resolve_model(&self, model: Option<&str>, provider: &Provider) -> Result<String> {
        model
            .map(str::to_string)
            .or_else(|| provider.default_model(self.capability).map(str::to_string))
            .ok_or_else(|| {
                AiError::Config(format!(
                    "No model was given and provider [{}] has no default model for {}.",
                    provider.name(),
                    self.capability.description()
                ))
            })
    }

    pub async fn run<T, Op, Fut>(
        self,
        resolver: &dyn ProviderResolver,
        events: &EventBus,
        mut operation: Op,
    ) -> Result<T>
    where
        Op: FnMut(Provider, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.pairs.is_empty() {
            return Err(AiError::Config(
                "No providers were given to attempt.".to_string(),
            ));
        }

        let mut last_error = None;
        for pair in self.pairs {
            let provider = resolver.resolve(&pair.provider, self.capability).await?;
            let model = self.resolve_model(pair.model.as_deref(), &provider)?;

            match operation(provider, model.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_failoverable() => {
                    tracing::warn!(
                        provider = %pair.provider,
                        model = %model,
                        capability = %self.capability,
                        error = %e,
                        "Provider failed over"
                    );
                    metrics::counter!(
                        "ai_failover.total",
                        "capability" => self.capability.as_str(),
                        "provider" => pair.provider.clone()
                    )
                    .increment(1);
                    events.dispatch(match &self.agent {
                        Some(agent) => AiEvent::AgentFailedOver {
                            agent: agent.clone(),
                            provider: pair.provider.clone(),
                            model,
                            error: e.to_string(),
                        },
                        None => AiEvent::ProviderFailedOver {
                            provider: pair.provider.clone(),
                            model,
                            error: e.to_string(),
                        },
                    });
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AiError::Config("No providers were given to attempt.".to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ProviderDefaults;
    use crate::traits::{ProviderContext, ProviderGateways};
    use std::sync::{Arc, Mutex};

    struct Known(EventBus);

    #[async_trait]
    impl ProviderResolver for Known {
        async fn resolve(&self, name: &str, _capability: Capability) -> Result<Provider> {
            if name == "missing" {
                return Err(AiError::CapabilityMismatch(format!(
                    "Provider [{name}] does not support text generation."
                )));
            }
            Ok(Provider::new(
                ProviderContext::new(name, "mock"),
                ProviderDefaults {
                    text: Some(format!("{name}-default")),
                    ..ProviderDefaults::default()
                },
                ProviderGateways::default(),
                self.0.clone(),
            ))
        }
    }

    fn recorded(bus: &EventBus) -> Arc<Mutex<Vec<AiEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.listen(move |event: &AiEvent| sink.lock().unwrap().push(event.clone()));
        seen
    }

    #[tokio::test]
    async fn first_success_wins_after_failovers() {
        let bus = EventBus::new();
        let seen = recorded(&bus);
        let pairs = ProviderModelList::from(vec!["a", "b", "c"]);

        let served = Failover::new(&pairs, Capability::Text)
            .run(&Known(bus.clone()), &bus, |provider, model| async move {
                if provider.name() == "c" {
                    Ok(model)
                } else {
                    Err(AiError::rate_limited(provider.name()))
                }
            })
            .await
            .unwrap();

        assert_eq!(served, "c-default");
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.name() == "ProviderFailedOver"));
    }

    #[tokio::test]
    async fn exhaustion_returns_the_last_error() {
        let bus = EventBus::new();
        let pairs = ProviderModelList::from(vec!["a", "b"]);

        let err = Failover::new(&pairs, Capability::Text)
            .run(&Known(bus.clone()), &bus, |provider, _model| async move {
                Err::<(), _>(AiError::rate_limited(provider.name()))
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("[b]"));
    }

    #[tokio::test]
    async fn empty_list_is_a_config_error() {
        let bus = EventBus::new();
        let pairs = ProviderModelList::new();
        let err = Failover::new(&pairs, Capability::Text)
            .run(&Known(bus.clone()), &bus, |_, _| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Config(_)));
    }

    #[tokio::test]
    async fn non_failoverable_errors_stop_immediately() {
        let bus = EventBus::new();
        let pairs = ProviderModelList::from(vec!["a", "b"]);
        let attempts = Arc::new(Mutex::new(0));
        let counter = attempts.clone();

        let err = Failover::new(&pairs, Capability::Text)
            .run(&Known(bus.clone()), &bus, move |provider, _| {
                *counter.lock().unwrap() += 1;
                let name = provider.name().to_string();
                async move {
                    Err::<(), _>(AiError::Vendor {
                        provider: name,
                        status: 500,
                        message: "boom".into(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert_eq!(*attempts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn model_resolution_prefers_pair_then_provider_default() {
        let bus = EventBus::new();
        let pairs = ProviderModelList::from(vec![("a", "explicit")]).push("b", None);

        let models = Arc::new(Mutex::new(Vec::new()));
        let sink = models.clone();
        let _ = Failover::new(&pairs, Capability::Text)
            .for_agent(AgentKey::named("triage"))
            .run(&Known(bus.clone()), &bus, move |provider, model| {
                sink.lock().unwrap().push(model);
                let name = provider.name().to_string();
                async move { Err::<(), _>(AiError::rate_limited(name)) }
            })
            .await;

        assert_eq!(*models.lock().unwrap(), vec!["explicit", "b-default"]);
    }

    #[tokio::test]
    async fn capability_mismatch_is_not_failed_over() {
        let bus = EventBus::new();
        let pairs = ProviderModelList::from(vec!["missing", "a"]);
        let err = Failover::new(&pairs, Capability::Text)
            .run(&Known(bus.clone()), &bus, |_, model| async move { Ok(model) })
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::CapabilityMismatch(_)));
    }
}
