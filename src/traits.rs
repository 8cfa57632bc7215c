//! Core traits every provider driver, gateway, and tool must satisfy.
//!
//! A vendor adapter implements one gateway trait per capability it offers.
//! Every gateway operation receives the [`ProviderContext`] of the provider
//! it runs for, so a single gateway value can serve several configured
//! providers of the same driver.

use crate::api::{Capability, ProviderConfig, ProviderDefaults};
use crate::error::Result;
use crate::prompt::{
    AudioPrompt, EmbeddingsPrompt, FileUpload, ImagePrompt, RerankingPrompt, StoreRequest,
    TextRequest, TranscriptionPrompt,
};
use crate::response::{
    AgentResponse, AudioResponse, EmbeddingsResponse, FileResponse, ImageResponse,
    RerankingResponse, StoreResponse, StoredFileResponse, TranscriptionResponse,
};
use crate::streaming::EventStream;
use crate::tool::ToolRequest;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Resolved identity and credentials of a configured provider.
#[derive(Clone, Default, PartialEq)]
pub struct ProviderContext {
    /// Configured provider name (e.g. `"openai"`, `"openai-eu"`).
    pub name: String,
    /// Driver implementing the provider.
    pub driver: String,
    /// API key, if the driver needs one.
    pub key: Option<String>,
    /// Base URL override.
    pub url: Option<String>,
    /// Driver-specific options from configuration.
    pub options: Value,
}

impl ProviderContext {
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            ..Self::default()
        }
    }

    pub fn from_config(name: &str, config: &ProviderConfig) -> Self {
        Self {
            name: name.to_string(),
            driver: config.driver.clone(),
            key: config.key.clone(),
            url: config.url.clone(),
            options: config.options.clone(),
        }
    }

    /// String option lookup.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

impl std::fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderContext")
            .field("name", &self.name)
            .field("driver", &self.driver)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("url", &self.url)
            .field("options", &self.options)
            .finish()
    }
}

/// Text generation, synchronous and streamed.
#[async_trait]
pub trait TextGateway: Send + Sync {
    /// Generate a complete response, running the request's tools for up to
    /// `options.max_steps` rounds.
    async fn generate_text(
        &self,
        context: &ProviderContext,
        request: TextRequest,
    ) -> Result<AgentResponse>;

    /// Open a stream of normalized events.
    ///
    /// The vendor connection is established before this returns, so
    /// connection-time failures (including rate limits) surface here rather
    /// than from the stream.
    async fn stream_text(
        &self,
        context: &ProviderContext,
        request: TextRequest,
    ) -> Result<EventStream>;
}

#[async_trait]
pub trait ImageGateway: Send + Sync {
    async fn generate_image(
        &self,
        context: &ProviderContext,
        prompt: &ImagePrompt,
    ) -> Result<ImageResponse>;
}

#[async_trait]
pub trait AudioGateway: Send + Sync {
    async fn generate_audio(
        &self,
        context: &ProviderContext,
        prompt: &AudioPrompt,
    ) -> Result<AudioResponse>;
}

#[async_trait]
pub trait TranscriptionGateway: Send + Sync {
    async fn generate_transcription(
        &self,
        context: &ProviderContext,
        prompt: &TranscriptionPrompt,
    ) -> Result<TranscriptionResponse>;
}

#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Embed every input, returning one vector per input in input order.
    async fn generate_embeddings(
        &self,
        context: &ProviderContext,
        prompt: &EmbeddingsPrompt,
    ) -> Result<EmbeddingsResponse>;
}

#[async_trait]
pub trait RerankingGateway: Send + Sync {
    /// Rerank documents by relevance, most relevant first.
    async fn rerank(
        &self,
        context: &ProviderContext,
        prompt: &RerankingPrompt,
    ) -> Result<RerankingResponse>;
}

/// Provider-side file storage.
#[async_trait]
pub trait FileGateway: Send + Sync {
    async fn put_file(
        &self,
        context: &ProviderContext,
        file: &FileUpload,
    ) -> Result<StoredFileResponse>;

    async fn get_file(&self, context: &ProviderContext, file_id: &str) -> Result<FileResponse>;

    async fn delete_file(&self, context: &ProviderContext, file_id: &str) -> Result<()>;
}

/// Provider-side vector stores.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn create_store(
        &self,
        context: &ProviderContext,
        request: &StoreRequest,
    ) -> Result<StoreResponse>;

    async fn get_store(&self, context: &ProviderContext, store_id: &str) -> Result<StoreResponse>;

    async fn delete_store(&self, context: &ProviderContext, store_id: &str) -> Result<bool>;

    async fn add_file(
        &self,
        context: &ProviderContext,
        store_id: &str,
        file_id: &str,
    ) -> Result<()>;

    async fn remove_file(
        &self,
        context: &ProviderContext,
        store_id: &str,
        file_id: &str,
    ) -> Result<bool>;
}

/// The gateways a driver produces for one configured provider. A `None`
/// field means the capability is not supported.
#[derive(Clone, Default)]
pub struct ProviderGateways {
    pub text: Option<Arc<dyn TextGateway>>,
    pub image: Option<Arc<dyn ImageGateway>>,
    pub audio: Option<Arc<dyn AudioGateway>>,
    pub transcription: Option<Arc<dyn TranscriptionGateway>>,
    pub embeddings: Option<Arc<dyn EmbeddingGateway>>,
    pub reranking: Option<Arc<dyn RerankingGateway>>,
    pub files: Option<Arc<dyn FileGateway>>,
    pub stores: Option<Arc<dyn StoreGateway>>,
}

impl ProviderGateways {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Text => self.text.is_some(),
            Capability::Image => self.image.is_some(),
            Capability::Audio => self.audio.is_some(),
            Capability::Transcription => self.transcription.is_some(),
            Capability::Embeddings => self.embeddings.is_some(),
            Capability::Reranking => self.reranking.is_some(),
            Capability::Files => self.files.is_some(),
            Capability::Stores => self.stores.is_some(),
        }
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.supports(*c))
            .collect()
    }
}

/// A pluggable vendor integration.
///
/// Drivers are registered with
/// [`AiBuilder::register_driver`](crate::ai::AiBuilder::register_driver) and
/// are identified by their [`driver_id`](ProviderDriver::driver_id), which
/// configured providers reference through `driver`.
pub trait ProviderDriver: Send + Sync {
    /// Unique identifier for this driver (e.g. `"openai"`).
    fn driver_id(&self) -> &str;

    /// Default models per capability.
    fn defaults(&self) -> ProviderDefaults;

    /// Build the gateways for one configured provider.
    ///
    /// Called lazily the first time the provider is used; the result is
    /// cached for the lifetime of the registry.
    fn create(&self, context: &ProviderContext) -> Result<ProviderGateways>;
}

/// An agent-authored tool the model may call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the tool's parameters.
    fn schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    /// Run the tool. Errors are propagated to the caller unchanged.
    async fn handle(&self, request: ToolRequest) -> anyhow::Result<String>;
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}
