#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uni_ai::agent::agent;
use uni_ai::ai::Ai;
use uni_ai::api::{AiConfig, Capability, ProviderConfig, ProviderDefaults};
use uni_ai::data::{Meta, RankedDocument, ToolCall, Usage};
use uni_ai::error::{AiError, Result};
use uni_ai::prompt::{EmbeddingsPrompt, ImagePrompt, RerankingPrompt, TextRequest};
use uni_ai::response::{AgentResponse, EmbeddingsResponse, ImageResponse, RerankingResponse};
use uni_ai::streaming::{EventStream, text_to_events};
use uni_ai::tool::invoke_tool_calls;
use uni_ai::traits::{
    EmbeddingGateway, ImageGateway, ProviderContext, ProviderDriver, ProviderGateways,
    RerankingGateway, TextGateway,
};

pub const MOCK_TEXT_MODEL: &str = "mock-text";
pub const MOCK_EMBEDDING_MODEL: &str = "mock-embed";
pub const MOCK_DIMENSIONS: u32 = 8;

/// One call that reached a mock gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub provider: String,
    pub capability: Capability,
    pub model: String,
    pub input: String,
}

#[derive(Default)]
struct MockState {
    rate_limited: HashSet<String>,
    failing: HashMap<String, String>,
    calls: Vec<MockCall>,
}

/// Scriptable driver with text, image, embeddings and reranking gateways.
///
/// Text replies are `"<provider>:<model>:<prompt>"`. Providers can be told to
/// answer with a rate limit or a vendor error.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate_limit(&self, provider: &str) -> &Self {
        self.state
            .lock()
            .unwrap()
            .rate_limited
            .insert(provider.to_string());
        self
    }

    pub fn fail_with(&self, provider: &str, message: &str) -> &Self {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(provider.to_string(), message.to_string());
        self
    }

    pub fn recover(&self, provider: &str) -> &Self {
        let mut state = self.state.lock().unwrap();
        state.rate_limited.remove(provider);
        state.failing.remove(provider);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, provider: &str) -> usize {
        self.calls().iter().filter(|c| c.provider == provider).count()
    }

    fn call(
        &self,
        context: &ProviderContext,
        capability: Capability,
        model: &str,
        input: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall {
            provider: context.name.clone(),
            capability,
            model: model.to_string(),
            input: input.to_string(),
        });
        if state.rate_limited.contains(&context.name) {
            return Err(AiError::rate_limited(&context.name));
        }
        if let Some(message) = state.failing.get(&context.name) {
            return Err(AiError::Vendor {
                provider: context.name.clone(),
                status: 500,
                message: message.clone(),
            });
        }
        Ok(())
    }
}

impl ProviderDriver for MockDriver {
    fn driver_id(&self) -> &str {
        "mock"
    }

    fn defaults(&self) -> ProviderDefaults {
        ProviderDefaults {
            text: Some(MOCK_TEXT_MODEL.to_string()),
            image: Some("mock-image".to_string()),
            embeddings: Some(MOCK_EMBEDDING_MODEL.to_string()),
            embedding_dimensions: Some(MOCK_DIMENSIONS),
            reranking: Some("mock-rerank".to_string()),
            ..ProviderDefaults::default()
        }
    }

    fn create(&self, _context: &ProviderContext) -> Result<ProviderGateways> {
        let gateway = Arc::new(self.clone());
        Ok(ProviderGateways {
            text: Some(gateway.clone()),
            image: Some(gateway.clone()),
            embeddings: Some(gateway.clone()),
            reranking: Some(gateway),
            ..ProviderGateways::default()
        })
    }
}

fn reply_text(context: &ProviderContext, request: &TextRequest) -> String {
    format!("{}:{}:{}", context.name, request.model(), request.prompt.prompt)
}

#[async_trait]
impl TextGateway for MockDriver {
    async fn generate_text(
        &self,
        context: &ProviderContext,
        request: TextRequest,
    ) -> Result<AgentResponse> {
        self.call(context, Capability::Text, request.model(), &request.prompt.prompt)?;

        // Every offered tool is called once, with no arguments.
        let calls: Vec<ToolCall> = request
            .tools
            .iter()
            .enumerate()
            .map(|(i, tool)| ToolCall::new(format!("call_{i}"), tool.name(), Default::default()))
            .collect();
        let results =
            invoke_tool_calls(&request.invocation_id, &request.tools, &calls, &request.hooks)
                .await?;

        let mut text = reply_text(context, &request);
        for result in &results {
            text.push_str(&format!(" [{}]", result.result));
        }
        let mut response = AgentResponse::new(
            request.invocation_id.clone(),
            text,
            Usage::new(3, 5),
            Meta::new(&context.name, request.model()),
        );
        response.tool_calls = calls;
        response.tool_results = results;
        Ok(response)
    }

    async fn stream_text(
        &self,
        context: &ProviderContext,
        request: TextRequest,
    ) -> Result<EventStream> {
        self.call(context, Capability::Text, request.model(), &request.prompt.prompt)?;
        let events = text_to_events(
            &request.invocation_id,
            &context.name,
            request.model(),
            &reply_text(context, &request),
            Usage::new(3, 5),
        );
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

#[async_trait]
impl ImageGateway for MockDriver {
    async fn generate_image(
        &self,
        context: &ProviderContext,
        prompt: &ImagePrompt,
    ) -> Result<ImageResponse> {
        self.call(context, Capability::Image, &prompt.model, &prompt.prompt)?;
        Ok(ImageResponse {
            images: vec![uni_ai::data::GeneratedImage {
                image: "aW1hZ2U=".to_string(),
                mime_type: Some("image/png".to_string()),
            }],
            meta: Meta::new(&context.name, &prompt.model),
            ..ImageResponse::default()
        })
    }
}

#[async_trait]
impl EmbeddingGateway for MockDriver {
    async fn generate_embeddings(
        &self,
        context: &ProviderContext,
        prompt: &EmbeddingsPrompt,
    ) -> Result<EmbeddingsResponse> {
        self.call(
            context,
            Capability::Embeddings,
            &prompt.model,
            &prompt.inputs.join("|"),
        )?;
        Ok(EmbeddingsResponse {
            embeddings: prompt
                .inputs
                .iter()
                .map(|input| vec![input.len() as f32; prompt.dimensions as usize])
                .collect(),
            tokens: prompt.inputs.len() as u64,
            meta: Meta::new(&context.name, &prompt.model),
        })
    }
}

#[async_trait]
impl RerankingGateway for MockDriver {
    /// Longest document first.
    async fn rerank(
        &self,
        context: &ProviderContext,
        prompt: &RerankingPrompt,
    ) -> Result<RerankingResponse> {
        self.call(context, Capability::Reranking, &prompt.model, &prompt.query)?;
        let mut results: Vec<RankedDocument> = prompt
            .documents
            .iter()
            .enumerate()
            .map(|(index, document)| RankedDocument {
                index,
                document: document.clone(),
                score: document.len() as f64,
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        if let Some(limit) = prompt.limit {
            results.truncate(limit);
        }
        Ok(RerankingResponse {
            results,
            meta: Meta::new(&context.name, &prompt.model),
        })
    }
}

/// Config with one mock provider per name, the first being the default for
/// every capability.
pub fn mock_config(names: &[&str]) -> AiConfig {
    let mut config = names.iter().fold(AiConfig::new(), |config, name| {
        config.provider(*name, ProviderConfig::new("mock"))
    });
    if let Some(first) = names.first() {
        for capability in Capability::ALL {
            config = config.default_for(capability, *first);
        }
    }
    config
}

pub fn mock_ai(driver: &MockDriver, names: &[&str]) -> Ai {
    Ai::builder()
        .config(mock_config(names))
        .register_driver(driver.clone())
        .build()
        .unwrap()
}

pub fn assistant() -> uni_ai::agent::AnonymousAgent {
    agent("You are a test assistant.")
}
