//! The [`Ai`] facade: the entry point applications talk to.
//!
//! `Ai` owns the provider registry, the event bus, the queue dispatcher, the
//! embeddings cache and (in tests) a [`FakeContext`]. Every operation resolves
//! its provider list (explicit, then agent preference, then the configured
//! default for the capability) and runs it through [`Failover`].
//!
//! ```no_run
//! use uni_ai::agent::agent;
//! use uni_ai::ai::Ai;
//! use uni_ai::api::{AiConfig, ProviderConfig};
//!
//! # async fn demo() -> uni_ai::error::Result<()> {
//! let ai = Ai::builder()
//!     .config(AiConfig::new().provider("openai", ProviderConfig::new("openai")))
//!     .build()?;
//!
//! let response = ai
//!     .agent(agent("You are terse."))
//!     .provider(["openai"])
//!     .prompt("Name a prime number.")
//!     .await?;
//! println!("{}", response.text);
//! # Ok(())
//! # }
//! ```

use crate::agent::{Agent, AgentKey};
use crate::api::{AiConfig, Capability, ProviderModelList};
use crate::cache::{DEFAULT_TTL_SECONDS, EmbeddingsCache, InMemoryEmbeddingsCache, embeddings_cache_key};
use crate::data::Attachment;
use crate::error::{AiError, Result};
use crate::events::EventBus;
use crate::failover::{Failover, ProviderResolver};
use crate::fake::FakeContext;
use crate::middleware::{Pipeline, PipelineOutput, terminal};
use crate::prompt::{
    AgentPrompt, AudioPrompt, DEFAULT_VOICE, EmbeddingsPrompt, FileUpload, ImagePrompt,
    RerankingPrompt, StoreRequest, TranscriptionPrompt,
};
use crate::provider::{LoopbackDriver, Provider};
use crate::queue::{
    Dispatcher, PendingDispatch, QueuedAgentPrompt, QueuedAudioPrompt, QueuedEmbeddingsPrompt,
    QueuedImagePrompt, QueuedOperation, QueuedRerankingPrompt, QueuedResponse,
    QueuedTranscriptionPrompt, TokioDispatcher,
};
use crate::registry::ProviderRegistry;
use crate::response::{
    AgentResponse, AudioResponse, EmbeddingsResponse, FileResponse, ImageResponse,
    RerankingResponse, StoreResponse, StoredFileResponse, StreamableAgentResponse,
    TranscriptionResponse,
};
use crate::traits::ProviderDriver;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Used when neither the request nor the provider names embedding dimensions.
const FALLBACK_EMBEDDING_DIMENSIONS: u32 = 1536;

struct AiInner {
    registry: ProviderRegistry,
    fakes: Option<FakeContext>,
    dispatcher: Arc<dyn Dispatcher>,
    embeddings_cache: Arc<dyn EmbeddingsCache>,
    agents: HashMap<AgentKey, Arc<dyn Agent>>,
}

/// Handle to a configured gateway. Cheap to clone.
#[derive(Clone)]
pub struct Ai {
    inner: Arc<AiInner>,
}

/// Builder for [`Ai`].
pub struct AiBuilder {
    config: AiConfig,
    drivers: HashMap<String, Arc<dyn ProviderDriver>>,
    events: EventBus,
    fakes: Option<FakeContext>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    embeddings_cache: Option<Arc<dyn EmbeddingsCache>>,
    agents: HashMap<AgentKey, Arc<dyn Agent>>,
}

impl Default for AiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AiBuilder {
    /// A builder with the loopback driver and every compiled-in vendor driver
    /// registered.
    pub fn new() -> Self {
        let builder = Self {
            config: AiConfig::default(),
            drivers: HashMap::new(),
            events: EventBus::new(),
            fakes: None,
            dispatcher: None,
            embeddings_cache: None,
            agents: HashMap::new(),
        }
        .register_driver(LoopbackDriver);

        #[cfg(feature = "provider-openai")]
        let builder = builder.register_driver(crate::provider::OpenAiDriver::default());
        #[cfg(feature = "provider-anthropic")]
        let builder = builder.register_driver(crate::provider::AnthropicDriver::default());
        #[cfg(feature = "provider-gemini")]
        let builder = builder.register_driver(crate::provider::GeminiDriver::default());
        #[cfg(feature = "provider-cohere")]
        let builder = builder.register_driver(crate::provider::CohereDriver::default());

        builder
    }

    pub fn config(mut self, config: AiConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a driver. A second driver with the same
    /// [`driver_id`](ProviderDriver::driver_id) replaces the first.
    pub fn register_driver<D: ProviderDriver + 'static>(mut self, driver: D) -> Self {
        self.drivers
            .insert(driver.driver_id().to_string(), Arc::new(driver));
        self
    }

    /// Use an existing event bus, e.g. one listeners were already added to.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Route faked capabilities and agents to `fakes`.
    pub fn fake(mut self, fakes: FakeContext) -> Self {
        self.fakes = Some(fakes);
        self
    }

    /// Where queued operations go. Defaults to [`TokioDispatcher`].
    pub fn dispatcher(mut self, dispatcher: impl Dispatcher + 'static) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Storage for cached embeddings. Defaults to [`InMemoryEmbeddingsCache`].
    pub fn embeddings_cache(mut self, cache: impl EmbeddingsCache + 'static) -> Self {
        self.embeddings_cache = Some(Arc::new(cache));
        self
    }

    /// Make an agent available to [`Ai::run_queued`] by its key.
    pub fn register_agent(mut self, agent: impl Agent + 'static) -> Self {
        self.agents.insert(agent.key(), Arc::new(agent));
        self
    }

    /// Validate the configuration against the registered drivers.
    pub fn build(self) -> Result<Ai> {
        let registry = ProviderRegistry::new(self.config, self.drivers, self.events)?;
        tracing::info!(
            providers = registry.config().providers.len(),
            faked = self.fakes.is_some(),
            "AI gateway ready"
        );
        Ok(Ai {
            inner: Arc::new(AiInner {
                registry,
                fakes: self.fakes,
                dispatcher: self
                    .dispatcher
                    .unwrap_or_else(|| Arc::new(TokioDispatcher)),
                embeddings_cache: self
                    .embeddings_cache
                    .unwrap_or_else(|| Arc::new(InMemoryEmbeddingsCache::new())),
                agents: self.agents,
            }),
        })
    }
}

impl Ai {
    pub fn builder() -> AiBuilder {
        AiBuilder::new()
    }

    pub fn config(&self) -> &AiConfig {
        self.inner.registry.config()
    }

    pub fn events(&self) -> &EventBus {
        self.inner.registry.events()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn fakes(&self) -> Option<&FakeContext> {
        self.inner.fakes.as_ref()
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn embeddings_cache(&self) -> &Arc<dyn EmbeddingsCache> {
        &self.inner.embeddings_cache
    }

    /// The configured provider `name`, without capability checks or fakes.
    pub async fn provider(&self, name: &str) -> Result<Provider> {
        self.inner.registry.provider(name).await
    }

    /// Resolve `name` for `capability`, swapping in fake gateways when the
    /// capability (or, for text, `agent`) is faked. A provider lacking
    /// `capability` is a mismatch even when the capability is faked.
    #[tracing::instrument(skip(self, agent), fields(agent = agent.map(AgentKey::as_str)))]
    pub async fn resolve_provider(
        &self,
        name: &str,
        capability: Capability,
        agent: Option<&AgentKey>,
    ) -> Result<Provider> {
        let provider = self.inner.registry.provider(name).await?;
        provider.ensure_supports(capability)?;
        if let Some(fakes) = &self.inner.fakes
            && let Some(faked) = fakes.intercept(provider.clone(), capability, agent)
        {
            tracing::debug!(provider = %name, capability = %capability, "Using fake gateway");
            return Ok(faked);
        }
        Ok(provider)
    }

    /// `explicit` when given, the configured default for `capability`
    /// otherwise.
    fn providers_for(
        &self,
        explicit: Option<ProviderModelList>,
        capability: Capability,
    ) -> Result<ProviderModelList> {
        match explicit {
            Some(list) if !list.is_empty() => Ok(list),
            _ => Ok(ProviderModelList::from(
                self.inner.registry.default_provider_name(capability)?,
            )),
        }
    }

    async fn failover<T, Op, Fut>(
        &self,
        pairs: &ProviderModelList,
        capability: Capability,
        operation: Op,
    ) -> Result<T>
    where
        Op: FnMut(Provider, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        Failover::new(pairs, capability)
            .run(self, self.events(), operation)
            .await
    }

    // Agents

    /// Prepare a prompt for `agent`.
    pub fn agent(&self, agent: impl Agent + 'static) -> PendingAgentPrompt {
        self.shared_agent(Arc::new(agent))
    }

    pub fn shared_agent(&self, agent: Arc<dyn Agent>) -> PendingAgentPrompt {
        PendingAgentPrompt {
            ai: self.clone(),
            agent,
            provider: None,
            model: None,
            attachments: Vec::new(),
        }
    }

    async fn run_agent<O, F, Fut>(
        &self,
        agent: Arc<dyn Agent>,
        pairs: ProviderModelList,
        text: String,
        attachments: Vec<Attachment>,
        dispatch: F,
    ) -> Result<O>
    where
        O: PipelineOutput,
        F: Fn(Provider, AgentPrompt) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let key = agent.key();
        let middleware = agent.middleware();
        let resolver = AgentResolver {
            ai: self,
            agent: &key,
        };
        tracing::info!(agent = %key, providers = pairs.len(), "Prompting agent");

        Failover::new(&pairs, Capability::Text)
            .for_agent(key.clone())
            .run(&resolver, self.events(), |provider, model| {
                let prompt = AgentPrompt::new(
                    agent.clone(),
                    text.clone(),
                    attachments.clone(),
                    provider.name(),
                    model,
                );
                let dispatch = dispatch.clone();
                let middleware = middleware.clone();
                async move {
                    let terminal = terminal(move |prompt| dispatch(provider.clone(), prompt));
                    Pipeline::new(&middleware).run(prompt, terminal).await
                }
            })
            .await
    }

    /// Execute a queued agent prompt against a live agent.
    pub async fn run_queued_prompt(
        &self,
        agent: Arc<dyn Agent>,
        queued: QueuedAgentPrompt,
    ) -> Result<AgentResponse> {
        PendingAgentPrompt {
            ai: self.clone(),
            agent,
            provider: queued.provider,
            model: queued.model,
            attachments: queued.attachments,
        }
        .prompt(queued.prompt)
        .await
    }

    /// Execute a queued operation, e.g. one deserialized by a worker.
    ///
    /// Agent prompts need the agent registered with
    /// [`AiBuilder::register_agent`].
    pub async fn run_queued(&self, operation: QueuedOperation) -> Result<QueuedResponse> {
        tracing::info!(capability = %operation.capability(), "Running queued operation");
        match operation {
            QueuedOperation::Prompt(prompt) => {
                let agent = self.inner.agents.get(&prompt.agent).cloned().ok_or_else(|| {
                    AiError::Config(format!(
                        "Agent [{}] is not registered for queued execution.",
                        prompt.agent
                    ))
                })?;
                self.run_queued_prompt(agent, prompt)
                    .await
                    .map(QueuedResponse::Text)
            }
            QueuedOperation::Embeddings(request) => PendingEmbeddings {
                ai: self.clone(),
                request,
            }
            .generate()
            .await
            .map(QueuedResponse::Embeddings),
            QueuedOperation::Image(request) => PendingImage {
                ai: self.clone(),
                request,
            }
            .generate()
            .await
            .map(QueuedResponse::Image),
            QueuedOperation::Audio(request) => PendingAudio {
                ai: self.clone(),
                request,
            }
            .generate()
            .await
            .map(QueuedResponse::Audio),
            QueuedOperation::Transcription(request) => PendingTranscription {
                ai: self.clone(),
                request,
            }
            .generate()
            .await
            .map(QueuedResponse::Transcription),
            QueuedOperation::Reranking(request) => {
                let query = request.query.clone();
                PendingReranking {
                    ai: self.clone(),
                    request,
                }
                .rerank(query)
                .await
                .map(QueuedResponse::Reranking)
            }
        }
    }

    // Other capabilities

    pub fn embeddings<I, S>(&self, inputs: I) -> PendingEmbeddings
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PendingEmbeddings {
            ai: self.clone(),
            request: QueuedEmbeddingsPrompt {
                inputs: inputs.into_iter().map(Into::into).collect(),
                ..QueuedEmbeddingsPrompt::default()
            },
        }
    }

    pub fn image(&self, prompt: impl Into<String>) -> PendingImage {
        PendingImage {
            ai: self.clone(),
            request: QueuedImagePrompt {
                prompt: prompt.into(),
                ..QueuedImagePrompt::default()
            },
        }
    }

    pub fn audio(&self, text: impl Into<String>) -> PendingAudio {
        PendingAudio {
            ai: self.clone(),
            request: QueuedAudioPrompt {
                text: text.into(),
                ..QueuedAudioPrompt::default()
            },
        }
    }

    pub fn transcription(&self, audio: Attachment) -> PendingTranscription {
        PendingTranscription {
            ai: self.clone(),
            request: QueuedTranscriptionPrompt {
                audio,
                language: None,
                diarize: false,
                provider: None,
                model: None,
            },
        }
    }

    pub fn reranking<I, S>(&self, documents: I) -> PendingReranking
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PendingReranking {
            ai: self.clone(),
            request: QueuedRerankingPrompt {
                documents: documents.into_iter().map(Into::into).collect(),
                ..QueuedRerankingPrompt::default()
            },
        }
    }

    pub fn files(&self) -> Files {
        Files {
            ai: self.clone(),
            provider: None,
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            ai: self.clone(),
            provider: None,
        }
    }
}

impl std::fmt::Debug for Ai {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ai")
            .field("config", self.config())
            .field("faked", &self.inner.fakes.is_some())
            .field("agents", &self.inner.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl ProviderResolver for Ai {
    async fn resolve(&self, name: &str, capability: Capability) -> Result<Provider> {
        self.resolve_provider(name, capability, None).await
    }
}

/// Resolves text providers on behalf of one agent, so agent fakes apply.
struct AgentResolver<'a> {
    ai: &'a Ai,
    agent: &'a AgentKey,
}

#[async_trait]
impl ProviderResolver for AgentResolver<'_> {
    async fn resolve(&self, name: &str, capability: Capability) -> Result<Provider> {
        self.ai
            .resolve_provider(name, capability, Some(self.agent))
            .await
    }
}

/// A prompt for one agent, awaiting `prompt`, `stream` or `queue`.
#[must_use]
pub struct PendingAgentPrompt {
    ai: Ai,
    agent: Arc<dyn Agent>,
    provider: Option<ProviderModelList>,
    model: Option<String>,
    attachments: Vec<Attachment>,
}

impl PendingAgentPrompt {
    /// Provider(s) to attempt, in failover order. Overrides the agent's own
    /// preference.
    pub fn provider(mut self, provider: impl Into<ProviderModelList>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn attachments(mut self, attachments: impl IntoIterator<Item = Attachment>) -> Self {
        self.attachments.extend(attachments);
        self
    }

    /// Explicit providers, else the agent's, else the configured default. A
    /// lone provider takes the explicit model, else the agent's model.
    fn pairs(&self) -> Result<ProviderModelList> {
        let pairs = self
            .ai
            .providers_for(self.provider.clone().or_else(|| self.agent.provider()), Capability::Text)?;
        let model = match (&self.model, pairs.len()) {
            (Some(model), _) => Some(model.clone()),
            (None, 1) => self.agent.model(),
            (None, _) => None,
        };
        Ok(pairs.with_model(model))
    }

    pub async fn prompt(self, prompt: impl Into<String>) -> Result<AgentResponse> {
        let pairs = self.pairs()?;
        self.ai
            .run_agent(
                self.agent,
                pairs,
                prompt.into(),
                self.attachments,
                |provider: Provider, prompt: AgentPrompt| async move { provider.prompt(prompt).await },
            )
            .await
    }

    /// Open a lazy event stream. Failover only covers opening the stream.
    pub async fn stream(self, prompt: impl Into<String>) -> Result<StreamableAgentResponse> {
        let pairs = self.pairs()?;
        self.ai
            .run_agent(
                self.agent,
                pairs,
                prompt.into(),
                self.attachments,
                |provider: Provider, prompt: AgentPrompt| async move { provider.stream(prompt).await },
            )
            .await
    }

    /// Defer the prompt to the configured dispatcher.
    pub fn queue(self, prompt: impl Into<String>) -> PendingDispatch {
        let operation = QueuedOperation::Prompt(QueuedAgentPrompt {
            agent: self.agent.key(),
            prompt: prompt.into(),
            attachments: self.attachments,
            provider: self.provider,
            model: self.model,
        });
        PendingDispatch::new(self.ai, operation).with_agent(self.agent)
    }
}

macro_rules! provider_and_model {
    () => {
        /// Provider(s) to attempt, in failover order.
        pub fn provider(mut self, provider: impl Into<ProviderModelList>) -> Self {
            self.request.provider = Some(provider.into());
            self
        }

        pub fn model(mut self, model: impl Into<String>) -> Self {
            self.request.model = Some(model.into());
            self
        }
    };
}

/// Embeddings request, awaiting `generate` or `queue`.
#[must_use]
pub struct PendingEmbeddings {
    ai: Ai,
    request: QueuedEmbeddingsPrompt,
}

impl PendingEmbeddings {
    provider_and_model!();

    pub fn dimensions(mut self, dimensions: u32) -> Self {
        self.request.dimensions = Some(dimensions);
        self
    }

    /// Cache the result even if caching is not enabled in configuration.
    pub fn cache(mut self) -> Self {
        self.request.cache = true;
        self
    }

    pub async fn generate(self) -> Result<EmbeddingsResponse> {
        let request = self.request;
        if request.model.is_some() && request.dimensions.is_none() {
            return Err(AiError::Config(
                "Embedding dimensions must be given when a model is specified.".to_string(),
            ));
        }

        let pairs = self
            .ai
            .providers_for(request.provider.clone(), Capability::Embeddings)?
            .with_model(request.model.clone());
        let settings = &self.ai.config().caching.embeddings;
        let caching = request.cache || settings.cache;
        let ttl = Duration::from_secs(settings.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS));

        self.ai
            .failover(&pairs, Capability::Embeddings, |provider, model| {
                let inputs = request.inputs.clone();
                let cache = self.ai.embeddings_cache().clone();
                let dimensions = request
                    .dimensions
                    .or(provider.defaults().embedding_dimensions)
                    .unwrap_or(FALLBACK_EMBEDDING_DIMENSIONS);
                async move {
                    let key = caching
                        .then(|| embeddings_cache_key(provider.driver(), &model, dimensions, &inputs));
                    if let Some(key) = &key
                        && let Some(hit) = cache.get(key).await
                    {
                        return Ok(hit);
                    }

                    let response = provider
                        .embeddings(EmbeddingsPrompt {
                            inputs,
                            dimensions,
                            provider: provider.name().to_string(),
                            model,
                        })
                        .await?;
                    if let Some(key) = &key {
                        cache.put(key, &response, ttl).await;
                    }
                    Ok(response)
                }
            })
            .await
    }

    pub fn queue(self) -> PendingDispatch {
        PendingDispatch::new(self.ai, QueuedOperation::Embeddings(self.request))
    }
}

/// Image request, awaiting `generate` or `queue`.
#[must_use]
pub struct PendingImage {
    ai: Ai,
    request: QueuedImagePrompt,
}

impl PendingImage {
    provider_and_model!();

    /// Aspect ratio: `"1:1"`, `"2:3"` or `"3:2"`.
    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.request.size = Some(size.into());
        self
    }

    pub fn square(self) -> Self {
        self.size("1:1")
    }

    pub fn portrait(self) -> Self {
        self.size("2:3")
    }

    pub fn landscape(self) -> Self {
        self.size("3:2")
    }

    /// `"low"`, `"medium"` or `"high"`.
    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.request.quality = Some(quality.into());
        self
    }

    pub fn attachments(mut self, attachments: impl IntoIterator<Item = Attachment>) -> Self {
        self.request.attachments.extend(attachments);
        self
    }

    pub async fn generate(self) -> Result<ImageResponse> {
        let request = self.request;
        let pairs = self
            .ai
            .providers_for(request.provider.clone(), Capability::Image)?
            .with_model(request.model.clone());
        self.ai
            .failover(&pairs, Capability::Image, |provider, model| {
                let prompt = ImagePrompt {
                    prompt: request.prompt.clone(),
                    attachments: request.attachments.clone(),
                    size: request.size.clone(),
                    quality: request.quality.clone(),
                    provider: provider.name().to_string(),
                    model,
                };
                async move { provider.image(prompt).await }
            })
            .await
    }

    pub fn queue(self) -> PendingDispatch {
        PendingDispatch::new(self.ai, QueuedOperation::Image(self.request))
    }
}

/// Speech synthesis request, awaiting `generate` or `queue`.
#[must_use]
pub struct PendingAudio {
    ai: Ai,
    request: QueuedAudioPrompt,
}

impl PendingAudio {
    provider_and_model!();

    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.request.voice = Some(voice.into());
        self
    }

    pub fn male(self) -> Self {
        self.voice("default-male")
    }

    pub fn female(self) -> Self {
        self.voice("default-female")
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.request.instructions = Some(instructions.into());
        self
    }

    pub async fn generate(self) -> Result<AudioResponse> {
        let request = self.request;
        let pairs = self
            .ai
            .providers_for(request.provider.clone(), Capability::Audio)?
            .with_model(request.model.clone());
        self.ai
            .failover(&pairs, Capability::Audio, |provider, model| {
                let prompt = AudioPrompt {
                    text: request.text.clone(),
                    voice: request
                        .voice
                        .clone()
                        .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
                    instructions: request.instructions.clone(),
                    provider: provider.name().to_string(),
                    model,
                };
                async move { provider.audio(prompt).await }
            })
            .await
    }

    pub fn queue(self) -> PendingDispatch {
        PendingDispatch::new(self.ai, QueuedOperation::Audio(self.request))
    }
}

/// Transcription request, awaiting `generate` or `queue`.
#[must_use]
pub struct PendingTranscription {
    ai: Ai,
    request: QueuedTranscriptionPrompt,
}

impl PendingTranscription {
    provider_and_model!();

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.request.language = Some(language.into());
        self
    }

    /// Ask for speaker-labelled segments.
    pub fn diarize(mut self) -> Self {
        self.request.diarize = true;
        self
    }

    pub async fn generate(self) -> Result<TranscriptionResponse> {
        let request = self.request;
        let pairs = self
            .ai
            .providers_for(request.provider.clone(), Capability::Transcription)?
            .with_model(request.model.clone());
        self.ai
            .failover(&pairs, Capability::Transcription, |provider, model| {
                let prompt = TranscriptionPrompt {
                    audio: request.audio.clone(),
                    language: request.language.clone(),
                    diarize: request.diarize,
                    provider: provider.name().to_string(),
                    model,
                };
                async move { provider.transcribe(prompt).await }
            })
            .await
    }

    pub fn queue(self) -> PendingDispatch {
        PendingDispatch::new(self.ai, QueuedOperation::Transcription(self.request))
    }
}

/// Reranking request, awaiting `rerank` or `queue`.
#[must_use]
pub struct PendingReranking {
    ai: Ai,
    request: QueuedRerankingPrompt,
}

impl PendingReranking {
    provider_and_model!();

    /// Keep only the `limit` most relevant documents.
    pub fn limit(mut self, limit: usize) -> Self {
        self.request.limit = Some(limit);
        self
    }

    pub async fn rerank(self, query: impl Into<String>) -> Result<RerankingResponse> {
        let mut request = self.request;
        request.query = query.into();
        let pairs = self
            .ai
            .providers_for(request.provider.clone(), Capability::Reranking)?
            .with_model(request.model.clone());
        self.ai
            .failover(&pairs, Capability::Reranking, |provider, model| {
                let prompt = RerankingPrompt {
                    query: request.query.clone(),
                    documents: request.documents.clone(),
                    limit: request.limit,
                    provider: provider.name().to_string(),
                    model,
                };
                async move { provider.rerank(prompt).await }
            })
            .await
    }

    pub fn queue(mut self, query: impl Into<String>) -> PendingDispatch {
        self.request.query = query.into();
        PendingDispatch::new(self.ai, QueuedOperation::Reranking(self.request))
    }
}

/// Provider-side file storage.
#[must_use]
pub struct Files {
    ai: Ai,
    provider: Option<ProviderModelList>,
}

impl Files {
    pub fn provider(mut self, provider: impl Into<ProviderModelList>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    fn pairs(&self) -> Result<ProviderModelList> {
        self.ai.providers_for(self.provider.clone(), Capability::Files)
    }

    pub async fn put(&self, file: FileUpload) -> Result<StoredFileResponse> {
        let pairs = self.pairs()?;
        self.ai
            .failover(&pairs, Capability::Files, |provider, _model| {
                let file = file.clone();
                async move { provider.put_file(file).await }
            })
            .await
    }

    pub async fn get(&self, file_id: &str) -> Result<FileResponse> {
        let pairs = self.pairs()?;
        self.ai
            .failover(&pairs, Capability::Files, |provider, _model| {
                let file_id = file_id.to_string();
                async move { provider.get_file(&file_id).await }
            })
            .await
    }

    pub async fn delete(&self, file_id: &str) -> Result<()> {
        let pairs = self.pairs()?;
        self.ai
            .failover(&pairs, Capability::Files, |provider, _model| {
                let file_id = file_id.to_string();
                async move { provider.delete_file(&file_id).await }
            })
            .await
    }
}

/// Provider-side vector stores.
#[must_use]
pub struct Stores {
    ai: Ai,
    provider: Option<ProviderModelList>,
}

impl Stores {
    pub fn provider(mut self, provider: impl Into<ProviderModelList>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    fn pairs(&self) -> Result<ProviderModelList> {
        self.ai.providers_for(self.provider.clone(), Capability::Stores)
    }

    pub async fn create(&self, request: StoreRequest) -> Result<StoreResponse> {
        let pairs = self.pairs()?;
        self.ai
            .failover(&pairs, Capability::Stores, |provider, _model| {
                let request = request.clone();
                async move { provider.create_store(request).await }
            })
            .await
    }

    pub async fn get(&self, store_id: &str) -> Result<StoreResponse> {
        let pairs = self.pairs()?;
        self.ai
            .failover(&pairs, Capability::Stores, |provider, _model| {
                let store_id = store_id.to_string();
                async move { provider.get_store(&store_id).await }
            })
            .await
    }

    /// Returns whether the store existed.
    pub async fn delete(&self, store_id: &str) -> Result<bool> {
        let pairs = self.pairs()?;
        self.ai
            .failover(&pairs, Capability::Stores, |provider, _model| {
                let store_id = store_id.to_string();
                async move { provider.delete_store(&store_id).await }
            })
            .await
    }

    pub async fn add_file(&self, store_id: &str, file_id: &str) -> Result<()> {
        let pairs = self.pairs()?;
        self.ai
            .failover(&pairs, Capability::Stores, |provider, _model| {
                let (store_id, file_id) = (store_id.to_string(), file_id.to_string());
                async move { provider.add_file_to_store(&store_id, &file_id).await }
            })
            .await
    }

    /// Returns whether the file was attached to the store.
    pub async fn remove_file(&self, store_id: &str, file_id: &str) -> Result<bool> {
        let pairs = self.pairs()?;
        self.ai
            .failover(&pairs, Capability::Stores, |provider, _model| {
                let (store_id, file_id) = (store_id.to_string(), file_id.to_string());
                async move { provider.remove_file_from_store(&store_id, &file_id).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::agent;
    use crate::api::ProviderConfig;
    use crate::fake::{FakeReplies, FakeText, Reply};

    fn local() -> Ai {
        Ai::builder()
            .config(
                AiConfig::new()
                    .provider("local", ProviderConfig::new("loopback"))
                    .default_for(Capability::Text, "local"),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn agents_use_the_default_provider() {
        let response = local().agent(agent("Echo.")).prompt("hello there").await.unwrap();
        assert_eq!(response.text, "hello there");
        assert_eq!(response.meta.provider.as_deref(), Some("local"));
        assert_eq!(response.meta.model.as_deref(), Some("loopback-text"));
    }

    #[tokio::test]
    async fn explicit_model_pins_a_lone_provider() {
        let response = local()
            .agent(agent("Echo.").model("agent-model"))
            .model("call-model")
            .prompt("hi")
            .await
            .unwrap();
        assert_eq!(response.meta.model.as_deref(), Some("call-model"));

        let response = local()
            .agent(agent("Echo.").model("agent-model"))
            .prompt("hi")
            .await
            .unwrap();
        assert_eq!(response.meta.model.as_deref(), Some("agent-model"));
    }

    #[tokio::test]
    async fn missing_default_is_a_config_error() {
        let ai = Ai::builder().build().unwrap();
        let err = ai.agent(agent("Echo.")).prompt("hi").await.unwrap_err();
        assert!(matches!(err, AiError::Config(_)));
    }

    #[tokio::test]
    async fn unsupported_capabilities_are_mismatches() {
        let err = local()
            .embeddings(["a"])
            .provider("local")
            .generate()
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::CapabilityMismatch(_)));
    }

    #[tokio::test]
    async fn faked_capabilities_still_require_support() {
        let fakes = FakeContext::new();
        fakes.fake_audio(FakeReplies::new());
        let ai = Ai::builder()
            .config(
                AiConfig::new()
                    .provider("local", ProviderConfig::new("loopback"))
                    .default_for(Capability::Audio, "local"),
            )
            .fake(fakes.clone())
            .build()
            .unwrap();

        // No model: the mismatch wins over the missing default model.
        let err = ai.audio("Good morning").generate().await.unwrap_err();
        assert!(matches!(err, AiError::CapabilityMismatch(_)));

        let err = ai
            .audio("Good morning")
            .provider("local")
            .model("tts-1")
            .generate()
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::CapabilityMismatch(_)));
        fakes.assert_no_audio_generated();
    }

    #[tokio::test]
    async fn explicit_embedding_model_requires_dimensions() {
        let err = local()
            .embeddings(["a"])
            .model("text-embedding-3-large")
            .generate()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimensions"));
    }

    #[tokio::test]
    async fn queued_agent_prompts_are_recorded_when_faked() {
        let fakes = FakeContext::new();
        let key = AgentKey::named("writer");
        fakes.fake_agent(key.clone(), FakeReplies::<AgentPrompt, FakeText>::sequence([Reply::from("ok")]));
        let ai = Ai::builder()
            .config(
                AiConfig::new()
                    .provider("local", ProviderConfig::new("loopback"))
                    .default_for(Capability::Text, "local"),
            )
            .fake(fakes.clone())
            .build()
            .unwrap();

        ai.agent(agent("Write.").named("writer"))
            .queue("Draft a haiku")
            .dispatch()
            .unwrap();

        fakes.assert_queued(&key, "Draft a haiku");
        fakes.assert_never_prompted(&key);
    }

    #[tokio::test]
    async fn unregistered_agents_cannot_run_from_a_queue() {
        let op = QueuedOperation::Prompt(QueuedAgentPrompt {
            agent: AgentKey::named("ghost"),
            prompt: "hi".into(),
            attachments: vec![],
            provider: None,
            model: None,
        });
        let err = local().run_queued(op).await.unwrap_err();
        assert!(err.to_string().contains("Agent [ghost] is not registered"));
    }

    #[tokio::test]
    async fn registered_agents_run_from_a_queue() {
        let ai = Ai::builder()
            .config(
                AiConfig::new()
                    .provider("local", ProviderConfig::new("loopback"))
                    .default_for(Capability::Text, "local"),
            )
            .register_agent(agent("Echo.").named("echo"))
            .build()
            .unwrap();
        let op = QueuedOperation::from_json(
            r#"{"operation":"prompt","agent":"echo","prompt":"queued hello"}"#,
        )
        .unwrap();

        let QueuedResponse::Text(response) = ai.run_queued(op).await.unwrap() else {
            panic!("expected a text response")
        };
        assert_eq!(response.text, "queued hello");
    }
}
