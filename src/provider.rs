//! Configured providers and the drivers that build them.
//!
//! A [`Provider`] is one configured vendor integration: a
//! [`ProviderContext`], its per-capability default models, and one optional
//! gateway per capability. The operations on `Provider` wrap each gateway
//! call with lifecycle events.
//!
//! Each remote driver is gated behind a Cargo feature flag. The loopback
//! driver is always compiled.
//!
//! | Module | Feature | Capabilities |
//! |--------|---------|--------------|
//! | `loopback` | none | text |
//! | `openai` | `provider-openai` | text, image, audio, transcription, embeddings, files, stores |
//! | `anthropic` | `provider-anthropic` | text |
//! | `gemini` | `provider-gemini` | text, image, embeddings |
//! | `cohere` | `provider-cohere` | embeddings, reranking |

pub mod loopback;

#[cfg(any(
    feature = "provider-openai",
    feature = "provider-anthropic",
    feature = "provider-gemini",
    feature = "provider-cohere",
))]
pub(crate) mod remote_common;

#[cfg(feature = "provider-openai")]
pub mod openai;

#[cfg(feature = "provider-anthropic")]
pub mod anthropic;

#[cfg(feature = "provider-gemini")]
pub mod gemini;

#[cfg(feature = "provider-cohere")]
pub mod cohere;

pub use loopback::LoopbackDriver;

#[cfg(feature = "provider-openai")]
pub use openai::OpenAiDriver;

#[cfg(feature = "provider-anthropic")]
pub use anthropic::AnthropicDriver;

#[cfg(feature = "provider-gemini")]
pub use gemini::GeminiDriver;

#[cfg(feature = "provider-cohere")]
pub use cohere::CohereDriver;

use crate::agent::AgentKey;
use crate::api::{Capability, ProviderDefaults};
use crate::data::Meta;
use crate::error::{AiError, Result};
use crate::events::{AiEvent, EventBus};
use crate::prompt::{
    AgentPrompt, AudioPrompt, EmbeddingsPrompt, FileUpload, ImagePrompt, RerankingPrompt,
    StoreRequest, TextRequest, TranscriptionPrompt,
};
use crate::response::{
    AgentResponse, AudioResponse, EmbeddingsResponse, FileResponse, ImageResponse,
    RerankingResponse, StoreResponse, StoredFileResponse, StreamableAgentResponse,
    TranscriptionResponse,
};
use crate::streaming::new_id;
use crate::tool::ToolInvocationHooks;
use crate::traits::{
    AudioGateway, EmbeddingGateway, FileGateway, ImageGateway, ProviderContext, ProviderGateways,
    RerankingGateway, StoreGateway, TextGateway, TranscriptionGateway,
};
use std::sync::Arc;

/// A configured provider with its gateways.
#[derive(Clone)]
pub struct Provider {
    context: ProviderContext,
    defaults: ProviderDefaults,
    gateways: ProviderGateways,
    events: EventBus,
}

macro_rules! gateway_accessors {
    ($($field:ident, $with:ident, $get:ident, $trait:ident, $capability:ident;)*) => {
        $(
            /// Replace this gateway, e.g. with a fake.
            pub fn $with(mut self, gateway: Arc<dyn $trait>) -> Self {
                self.gateways.$field = Some(gateway);
                self
            }

            pub fn $get(&self) -> Result<Arc<dyn $trait>> {
                self.gateways
                    .$field
                    .clone()
                    .ok_or_else(|| self.mismatch(Capability::$capability))
            }
        )*
    };
}

impl Provider {
    pub fn new(
        context: ProviderContext,
        defaults: ProviderDefaults,
        gateways: ProviderGateways,
        events: EventBus,
    ) -> Self {
        Self {
            context,
            defaults,
            gateways,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn driver(&self) -> &str {
        &self.context.driver
    }

    pub fn context(&self) -> &ProviderContext {
        &self.context
    }

    pub fn defaults(&self) -> &ProviderDefaults {
        &self.defaults
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.gateways.supports(capability)
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.gateways.capabilities()
    }

    pub fn default_model(&self, capability: Capability) -> Option<&str> {
        self.defaults.model_for(capability)
    }

    /// Fail with [`AiError::CapabilityMismatch`] unless the capability is
    /// supported.
    pub fn ensure_supports(&self, capability: Capability) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(self.mismatch(capability))
        }
    }

    fn mismatch(&self, capability: Capability) -> AiError {
        if self.context.name == self.context.driver {
            AiError::CapabilityMismatch(format!(
                "Provider [{}] does not support {}.",
                self.context.name,
                capability.description()
            ))
        } else {
            AiError::CapabilityMismatch(format!(
                "Provider [{}] (driver [{}]) does not support {}.",
                self.context.name,
                self.context.driver,
                capability.description()
            ))
        }
    }

    gateway_accessors! {
        text, with_text_gateway, text_gateway, TextGateway, Text;
        image, with_image_gateway, image_gateway, ImageGateway, Image;
        audio, with_audio_gateway, audio_gateway, AudioGateway, Audio;
        transcription, with_transcription_gateway, transcription_gateway, TranscriptionGateway, Transcription;
        embeddings, with_embedding_gateway, embedding_gateway, EmbeddingGateway, Embeddings;
        reranking, with_reranking_gateway, reranking_gateway, RerankingGateway, Reranking;
        files, with_file_gateway, file_gateway, FileGateway, Files;
        stores, with_store_gateway, store_gateway, StoreGateway, Stores;
    }

    fn tool_hooks(&self, agent: AgentKey) -> ToolInvocationHooks {
        let (before, after) = (self.events.clone(), self.events.clone());
        let agent_after = agent.clone();
        ToolInvocationHooks::new()
            .on_invoking(move |invocation_id, call| {
                before.dispatch(AiEvent::InvokingTool {
                    invocation_id: invocation_id.to_string(),
                    agent: agent.clone(),
                    tool_call: call.clone(),
                })
            })
            .on_invoked(move |invocation_id, call, result| {
                after.dispatch(AiEvent::ToolInvoked {
                    invocation_id: invocation_id.to_string(),
                    agent: agent_after.clone(),
                    tool_call: call.clone(),
                    tool_result: result.clone(),
                })
            })
    }

    /// Prompt an agent and wait for the complete response.
    pub async fn prompt(&self, prompt: AgentPrompt) -> Result<AgentResponse> {
        let gateway = self.text_gateway()?;
        let invocation_id = new_id();

        self.events.dispatch(AiEvent::InvokingAgent {
            invocation_id: invocation_id.clone(),
            prompt: prompt.clone(),
        });

        let request = TextRequest::new(&invocation_id, prompt.clone())
            .on_tool_invocation(self.tool_hooks(prompt.agent_key()));
        let response = gateway.generate_text(&self.context, request).await?;

        self.events.dispatch(AiEvent::AgentInvoked {
            invocation_id,
            prompt,
            response: response.clone(),
        });
        Ok(response)
    }

    /// Prompt an agent and return a lazy stream of its events.
    pub async fn stream(&self, prompt: AgentPrompt) -> Result<StreamableAgentResponse> {
        if prompt.agent.schema().is_some() {
            return Err(AiError::Config(
                "Streaming structured output is not currently supported.".to_string(),
            ));
        }

        let gateway = self.text_gateway()?;
        let invocation_id = new_id();

        self.events.dispatch(AiEvent::StreamingAgent {
            invocation_id: invocation_id.clone(),
            prompt: prompt.clone(),
        });

        let request = TextRequest::new(&invocation_id, prompt.clone())
            .on_tool_invocation(self.tool_hooks(prompt.agent_key()));
        let stream = gateway.stream_text(&self.context, request).await?;

        let events = self.events.clone();
        let meta = Meta::new(&self.context.name, &prompt.model);
        let id = invocation_id.clone();
        Ok(
            StreamableAgentResponse::new(invocation_id, meta, stream).then(move |streamed| {
                events.dispatch(AiEvent::AgentStreamed {
                    invocation_id: id,
                    prompt,
                    response: streamed.clone(),
                })
            }),
        )
    }

    pub async fn embeddings(&self, prompt: EmbeddingsPrompt) -> Result<EmbeddingsResponse> {
        let gateway = self.embedding_gateway()?;
        let invocation_id = new_id();
        self.events.dispatch(AiEvent::GeneratingEmbeddings {
            invocation_id: invocation_id.clone(),
            prompt: prompt.clone(),
        });
        let response = gateway.generate_embeddings(&self.context, &prompt).await?;
        self.events.dispatch(AiEvent::EmbeddingsGenerated {
            invocation_id,
            prompt,
            response: response.clone(),
        });
        Ok(response)
    }

    pub async fn image(&self, prompt: ImagePrompt) -> Result<ImageResponse> {
        let gateway = self.image_gateway()?;
        let invocation_id = new_id();
        self.events.dispatch(AiEvent::GeneratingImage {
            invocation_id: invocation_id.clone(),
            prompt: prompt.clone(),
        });
        let response = gateway.generate_image(&self.context, &prompt).await?;
        self.events.dispatch(AiEvent::ImageGenerated {
            invocation_id,
            prompt,
            response: response.clone(),
        });
        Ok(response)
    }

    pub async fn audio(&self, prompt: AudioPrompt) -> Result<AudioResponse> {
        let gateway = self.audio_gateway()?;
        let invocation_id = new_id();
        self.events.dispatch(AiEvent::GeneratingAudio {
            invocation_id: invocation_id.clone(),
            prompt: prompt.clone(),
        });
        let response = gateway.generate_audio(&self.context, &prompt).await?;
        self.events.dispatch(AiEvent::AudioGenerated {
            invocation_id,
            prompt,
            response: response.clone(),
        });
        Ok(response)
    }

    pub async fn transcribe(&self, prompt: TranscriptionPrompt) -> Result<TranscriptionResponse> {
        let gateway = self.transcription_gateway()?;
        let invocation_id = new_id();
        self.events.dispatch(AiEvent::GeneratingTranscription {
            invocation_id: invocation_id.clone(),
            prompt: prompt.clone(),
        });
        let response = gateway.generate_transcription(&self.context, &prompt).await?;
        self.events.dispatch(AiEvent::TranscriptionGenerated {
            invocation_id,
            prompt,
            response: response.clone(),
        });
        Ok(response)
    }

    pub async fn rerank(&self, prompt: RerankingPrompt) -> Result<RerankingResponse> {
        let gateway = self.reranking_gateway()?;
        let invocation_id = new_id();
        self.events.dispatch(AiEvent::Reranking {
            invocation_id: invocation_id.clone(),
            prompt: prompt.clone(),
        });
        let response = gateway.rerank(&self.context, &prompt).await?;
        self.events.dispatch(AiEvent::Reranked {
            invocation_id,
            prompt,
            response: response.clone(),
        });
        Ok(response)
    }

    pub async fn put_file(&self, file: FileUpload) -> Result<StoredFileResponse> {
        let gateway = self.file_gateway()?;
        let invocation_id = new_id();
        self.events.dispatch(AiEvent::StoringFile {
            invocation_id: invocation_id.clone(),
            provider: self.context.name.clone(),
            file: file.clone(),
        });
        let response = gateway.put_file(&self.context, &file).await?;
        self.events.dispatch(AiEvent::FileStored {
            invocation_id,
            provider: self.context.name.clone(),
            file,
            response: response.clone(),
        });
        Ok(response)
    }

    pub async fn get_file(&self, file_id: &str) -> Result<FileResponse> {
        self.file_gateway()?.get_file(&self.context, file_id).await
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.file_gateway()?.delete_file(&self.context, file_id).await?;
        self.events.dispatch(AiEvent::FileDeleted {
            invocation_id: new_id(),
            provider: self.context.name.clone(),
            file_id: file_id.to_string(),
        });
        Ok(())
    }

    pub async fn create_store(&self, request: StoreRequest) -> Result<StoreResponse> {
        let gateway = self.store_gateway()?;
        let invocation_id = new_id();
        self.events.dispatch(AiEvent::CreatingStore {
            invocation_id: invocation_id.clone(),
            provider: self.context.name.clone(),
            request: request.clone(),
        });
        let response = gateway.create_store(&self.context, &request).await?;
        self.events.dispatch(AiEvent::StoreCreated {
            invocation_id,
            provider: self.context.name.clone(),
            request,
            response: response.clone(),
        });
        Ok(response)
    }

    pub async fn get_store(&self, store_id: &str) -> Result<StoreResponse> {
        self.store_gateway()?.get_store(&self.context, store_id).await
    }

    /// Returns whether the store existed.
    pub async fn delete_store(&self, store_id: &str) -> Result<bool> {
        let deleted = self.store_gateway()?.delete_store(&self.context, store_id).await?;
        if deleted {
            self.events.dispatch(AiEvent::StoreDeleted {
                invocation_id: new_id(),
                provider: self.context.name.clone(),
                store_id: store_id.to_string(),
            });
        }
        Ok(deleted)
    }

    pub async fn add_file_to_store(&self, store_id: &str, file_id: &str) -> Result<()> {
        self.store_gateway()?
            .add_file(&self.context, store_id, file_id)
            .await?;
        self.events.dispatch(AiEvent::FileAddedToStore {
            invocation_id: new_id(),
            provider: self.context.name.clone(),
            store_id: store_id.to_string(),
            file_id: file_id.to_string(),
        });
        Ok(())
    }

    /// Returns whether the file was attached to the store.
    pub async fn remove_file_from_store(&self, store_id: &str, file_id: &str) -> Result<bool> {
        let removed = self
            .store_gateway()?
            .remove_file(&self.context, store_id, file_id)
            .await?;
        if removed {
            self.events.dispatch(AiEvent::FileRemovedFromStore {
                invocation_id: new_id(),
                provider: self.context.name.clone(),
                store_id: store_id.to_string(),
                file_id: file_id.to_string(),
            });
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("context", &self.context)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_only() -> Provider {
        let driver = LoopbackDriver;
        let context = ProviderContext::new("local", "loopback");
        let gateways = crate::traits::ProviderDriver::create(&driver, &context).unwrap();
        Provider::new(
            context,
            crate::traits::ProviderDriver::defaults(&driver),
            gateways,
            EventBus::new(),
        )
    }

    #[test]
    fn missing_gateways_name_provider_and_driver() {
        let provider = text_only();
        assert!(provider.supports(Capability::Text));
        let err = provider.ensure_supports(Capability::Audio).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Provider [local] (driver [loopback]) does not support audio generation."
        );
        assert!(matches!(provider.audio_gateway(), Err(AiError::CapabilityMismatch(_))));
    }

    #[tokio::test]
    async fn prompt_dispatches_before_and_after_events() {
        let provider = text_only();
        let names = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = names.clone();
        provider
            .events
            .listen(move |event: &AiEvent| sink.lock().unwrap().push(event.name()));

        let prompt = AgentPrompt::new(
            Arc::new(crate::agent::agent("echo")),
            "ping",
            vec![],
            "local",
            "loopback-text",
        );
        let response = provider.prompt(prompt).await.unwrap();

        assert_eq!(response.text, "ping");
        assert_eq!(*names.lock().unwrap(), vec!["InvokingAgent", "AgentInvoked"]);
    }

    #[tokio::test]
    async fn streaming_structured_output_is_rejected() {
        let provider = text_only();
        let prompt = AgentPrompt::new(
            Arc::new(crate::agent::agent("json").schema(serde_json::json!({"type": "object"}))),
            "ping",
            vec![],
            "local",
            "loopback-text",
        );
        let err = provider.stream(prompt).await.unwrap_err();
        assert!(err.to_string().contains("Streaming structured output is not currently supported."));
    }
}
