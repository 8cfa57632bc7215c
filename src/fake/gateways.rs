use super::{
    Answer, FakeContext, FakeText, fake_embedding, fake_value_for_schema, named_store, text_file,
};
use crate::data::{GeneratedImage, Meta, RankedDocument, Usage};
use crate::error::Result;
use crate::prompt::{
    AudioPrompt, EmbeddingsPrompt, FileUpload, ImagePrompt, RerankingPrompt, StoreRequest,
    TextRequest, TranscriptionPrompt,
};
use crate::response::{
    AgentResponse, AudioResponse, EmbeddingsResponse, FileResponse, ImageResponse,
    RerankingResponse, StoreResponse, StoredFileResponse, TranscriptionResponse,
};
use crate::streaming::{EventStream, text_to_events};
use crate::traits::{
    AudioGateway, EmbeddingGateway, FileGateway, ImageGateway, ProviderContext, RerankingGateway,
    StoreGateway, TextGateway, TranscriptionGateway,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Dimensions of synthesized embeddings when the prompt asks for none.
pub const DEFAULT_FAKE_DIMENSIONS: u32 = 1536;

macro_rules! fake_gateway {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone)]
            pub struct $name {
                fakes: FakeContext,
            }

            impl $name {
                pub fn new(fakes: FakeContext) -> Self {
                    Self { fakes }
                }
            }
        )*
    };
}

fake_gateway!(
    FakeTextGateway,
    FakeEmbeddingGateway,
    FakeImageGateway,
    FakeAudioGateway,
    FakeTranscriptionGateway,
    FakeRerankingGateway,
    FakeFileGateway,
    FakeStoreGateway,
);

impl FakeTextGateway {
    fn respond(&self, request: &TextRequest) -> Result<AgentResponse> {
        let prompt = &request.prompt;
        let answer = match self.fakes.answer_agent(prompt)? {
            Answer::Reply(reply) => reply.resolve(prompt)?,
            Answer::Default => match &request.schema {
                Some(schema) => fake_value_for_schema(schema).into(),
                None => FakeText::Text(format!("Fake response for prompt: {}", prompt.prompt)),
            },
        };

        let meta = Meta::new(&prompt.provider, &prompt.model);
        let response = match answer {
            FakeText::Text(text) => {
                AgentResponse::new(&request.invocation_id, text, Usage::default(), meta)
            }
            FakeText::Structured(structured) => {
                let text = serde_json::to_string(&structured)?;
                AgentResponse {
                    structured: Some(structured),
                    ..AgentResponse::new(&request.invocation_id, text, Usage::default(), meta)
                }
            }
            FakeText::Response(response) => AgentResponse {
                invocation_id: request.invocation_id.clone(),
                meta,
                ..response
            },
        };
        Ok(response)
    }
}

#[async_trait]
impl TextGateway for FakeTextGateway {
    async fn generate_text(
        &self,
        _context: &ProviderContext,
        request: TextRequest,
    ) -> Result<AgentResponse> {
        self.respond(&request)
    }

    async fn stream_text(
        &self,
        _context: &ProviderContext,
        request: TextRequest,
    ) -> Result<EventStream> {
        let response = self.respond(&request)?;
        let events = text_to_events(
            &request.invocation_id,
            &request.prompt.provider,
            request.model(),
            &response.text,
            response.usage,
        );
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

#[async_trait]
impl EmbeddingGateway for FakeEmbeddingGateway {
    async fn generate_embeddings(
        &self,
        _context: &ProviderContext,
        prompt: &EmbeddingsPrompt,
    ) -> Result<EmbeddingsResponse> {
        let meta = Meta::new(&prompt.provider, &prompt.model);
        let response = match self.fakes.answer_embeddings(prompt)? {
            Answer::Reply(reply) => reply.resolve(prompt)?,
            Answer::Default => {
                let dimensions = match prompt.dimensions {
                    0 => DEFAULT_FAKE_DIMENSIONS,
                    n => n,
                };
                EmbeddingsResponse {
                    embeddings: prompt
                        .inputs
                        .iter()
                        .map(|input| fake_embedding(input, dimensions))
                        .collect(),
                    ..EmbeddingsResponse::default()
                }
            }
        };
        Ok(EmbeddingsResponse { meta, ..response })
    }
}

#[async_trait]
impl ImageGateway for FakeImageGateway {
    async fn generate_image(
        &self,
        _context: &ProviderContext,
        prompt: &ImagePrompt,
    ) -> Result<ImageResponse> {
        let response = match self.fakes.answer_image(prompt)? {
            Answer::Reply(reply) => reply.resolve(prompt)?,
            Answer::Default => ImageResponse {
                images: vec![GeneratedImage {
                    image: STANDARD.encode("fake-image-content"),
                    mime_type: Some("image/png".to_string()),
                }],
                ..ImageResponse::default()
            },
        };
        Ok(ImageResponse {
            meta: Meta::new(&prompt.provider, &prompt.model),
            ..response
        })
    }
}

#[async_trait]
impl AudioGateway for FakeAudioGateway {
    async fn generate_audio(
        &self,
        _context: &ProviderContext,
        prompt: &AudioPrompt,
    ) -> Result<AudioResponse> {
        let response = match self.fakes.answer_audio(prompt)? {
            Answer::Reply(reply) => reply.resolve(prompt)?,
            Answer::Default => AudioResponse {
                audio: STANDARD.encode("fake-audio-content"),
                mime_type: Some("audio/mpeg".to_string()),
                ..AudioResponse::default()
            },
        };
        Ok(AudioResponse {
            meta: Meta::new(&prompt.provider, &prompt.model),
            ..response
        })
    }
}

#[async_trait]
impl TranscriptionGateway for FakeTranscriptionGateway {
    async fn generate_transcription(
        &self,
        _context: &ProviderContext,
        prompt: &TranscriptionPrompt,
    ) -> Result<TranscriptionResponse> {
        let response = match self.fakes.answer_transcription(prompt)? {
            Answer::Reply(reply) => reply.resolve(prompt)?,
            Answer::Default => TranscriptionResponse {
                text: "Fake transcription text.".to_string(),
                ..TranscriptionResponse::default()
            },
        };
        Ok(TranscriptionResponse {
            meta: Meta::new(&prompt.provider, &prompt.model),
            ..response
        })
    }
}

#[async_trait]
impl RerankingGateway for FakeRerankingGateway {
    async fn rerank(
        &self,
        _context: &ProviderContext,
        prompt: &RerankingPrompt,
    ) -> Result<RerankingResponse> {
        let mut response = match self.fakes.answer_reranking(prompt)? {
            Answer::Reply(reply) => reply.resolve(prompt)?,
            Answer::Default => {
                let count = prompt.documents.len().max(1) as f64;
                RerankingResponse {
                    results: prompt
                        .documents
                        .iter()
                        .enumerate()
                        .map(|(index, document)| RankedDocument {
                            index,
                            document: document.clone(),
                            score: 1.0 - index as f64 / count,
                        })
                        .collect(),
                    ..RerankingResponse::default()
                }
            }
        };
        if let Some(limit) = prompt.limit {
            response.results.truncate(limit);
        }
        response.meta = Meta::new(&prompt.provider, &prompt.model);
        Ok(response)
    }
}

#[async_trait]
impl FileGateway for FakeFileGateway {
    async fn put_file(
        &self,
        _context: &ProviderContext,
        file: &FileUpload,
    ) -> Result<StoredFileResponse> {
        Ok(StoredFileResponse {
            id: self.fakes.store_file(file),
        })
    }

    async fn get_file(&self, _context: &ProviderContext, file_id: &str) -> Result<FileResponse> {
        let id = file_id.to_string();
        let response = match self.fakes.answer_file()? {
            Answer::Reply(reply) => reply.resolve(&id)?,
            Answer::Default => text_file(b"fake-content".to_vec()),
        };
        Ok(FileResponse { id, ..response })
    }

    async fn delete_file(&self, _context: &ProviderContext, file_id: &str) -> Result<()> {
        self.fakes.delete_file(file_id);
        Ok(())
    }
}

#[async_trait]
impl StoreGateway for FakeStoreGateway {
    async fn create_store(
        &self,
        _context: &ProviderContext,
        request: &StoreRequest,
    ) -> Result<StoreResponse> {
        let id = self.fakes.create_store(request);
        Ok(StoreResponse {
            id,
            name: Some(request.name.clone()),
            ready: true,
            ..StoreResponse::default()
        })
    }

    async fn get_store(&self, _context: &ProviderContext, store_id: &str) -> Result<StoreResponse> {
        let id = store_id.to_string();
        let response = match self.fakes.answer_store()? {
            Answer::Reply(reply) => reply.resolve(&id)?,
            Answer::Default => named_store("fake-store".to_string()),
        };
        Ok(StoreResponse { id, ..response })
    }

    async fn delete_store(&self, _context: &ProviderContext, store_id: &str) -> Result<bool> {
        self.fakes.delete_store(store_id);
        Ok(true)
    }

    async fn add_file(
        &self,
        _context: &ProviderContext,
        store_id: &str,
        file_id: &str,
    ) -> Result<()> {
        self.fakes.add_file_to_store(store_id, file_id);
        Ok(())
    }

    async fn remove_file(
        &self,
        _context: &ProviderContext,
        store_id: &str,
        file_id: &str,
    ) -> Result<bool> {
        self.fakes.remove_file_from_store(store_id, file_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentKey, agent};
    use crate::error::AiError;
    use crate::fake::{FakeReplies, Reply};
    use crate::prompt::AgentPrompt;
    use futures::TryStreamExt;
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> ProviderContext {
        ProviderContext::new("openai", "openai")
    }

    fn request(text: &str) -> TextRequest {
        TextRequest::new(
            "inv-1",
            AgentPrompt::new(
                Arc::new(agent("Assist.").named("assistant")),
                text,
                vec![],
                "openai",
                "gpt-5-mini",
            ),
        )
    }

    #[tokio::test]
    async fn unfaked_prompts_get_the_default_reply() {
        let gateway = FakeTextGateway::new(FakeContext::new());
        let response = gateway.generate_text(&context(), request("Hello")).await.unwrap();
        assert_eq!(response.text, "Fake response for prompt: Hello");
        assert_eq!(response.meta, Meta::new("openai", "gpt-5-mini"));
    }

    #[tokio::test]
    async fn replies_mix_values_and_closures() {
        let fakes = FakeContext::new();
        let replies: Vec<Reply<AgentPrompt, FakeText>> = vec![
            Reply::from("First"),
            Reply::with(|p: &AgentPrompt| Ok(format!("Echo: {}", p.prompt))),
            Reply::fail(AiError::rate_limited("openai")),
        ];
        fakes.fake_agent(AgentKey::named("assistant"), replies);
        let gateway = FakeTextGateway::new(fakes);

        let first = gateway.generate_text(&context(), request("a")).await.unwrap();
        let second = gateway.generate_text(&context(), request("b")).await.unwrap();
        let third = gateway.generate_text(&context(), request("c")).await.unwrap_err();

        assert_eq!(first.text, "First");
        assert_eq!(second.text, "Echo: b");
        assert!(third.is_failoverable());
    }

    #[tokio::test]
    async fn streamed_fakes_produce_canonical_events() {
        let fakes = FakeContext::new();
        fakes.fake_agent(
            AgentKey::named("assistant"),
            FakeReplies::<AgentPrompt, FakeText>::sequence([Reply::from("Hi there")]),
        );
        let gateway = FakeTextGateway::new(fakes);

        let stream = gateway.stream_text(&context(), request("x")).await.unwrap();
        let events: Vec<_> = stream.try_collect().await.unwrap();
        assert_eq!(events.len(), 6);
    }

    #[tokio::test]
    async fn structured_agents_get_schema_values() {
        let gateway = FakeTextGateway::new(FakeContext::new());
        let prompt = AgentPrompt::new(
            Arc::new(agent("Rate.").schema(json!({
                "type": "object",
                "properties": { "score": { "type": "integer", "minimum": 1 } }
            }))),
            "Rate this",
            vec![],
            "openai",
            "gpt-5-mini",
        );
        let response = gateway
            .generate_text(&context(), TextRequest::new("inv", prompt))
            .await
            .unwrap()
            .into_structured()
            .unwrap();
        assert_eq!(response["score"], json!(1));
    }

    #[tokio::test]
    async fn default_embeddings_have_requested_dimensions() {
        let gateway = FakeEmbeddingGateway::new(FakeContext::new());
        let prompt = EmbeddingsPrompt {
            inputs: vec!["a".into(), "b".into()],
            dimensions: 0,
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
        };
        let response = gateway.generate_embeddings(&context(), &prompt).await.unwrap();
        assert_eq!(response.len(), 2);
        assert_eq!(response.first().unwrap().len(), 1536);
    }

    #[tokio::test]
    async fn reranking_defaults_keep_order_and_apply_limit() {
        let gateway = FakeRerankingGateway::new(FakeContext::new());
        let prompt = RerankingPrompt {
            query: "rust".into(),
            documents: vec!["a".into(), "b".into(), "c".into()],
            limit: Some(2),
            provider: "cohere".into(),
            model: "rerank-v3.5".into(),
        };
        let response = gateway.rerank(&context(), &prompt).await.unwrap();
        assert_eq!(response.documents(), vec!["a", "b"]);
        assert!(response.results[0].score > response.results[1].score);
    }

    #[tokio::test]
    async fn file_replies_take_the_requested_id() {
        let fakes = FakeContext::new();
        fakes.fake_files(FakeReplies::<String, FileResponse>::sequence([Reply::from(
            "first content",
        )]));
        let gateway = FakeFileGateway::new(fakes);

        let first = gateway.get_file(&context(), "file_123").await.unwrap();
        let second = gateway.get_file(&context(), "file_456").await.unwrap();

        assert_eq!(first.id, "file_123");
        assert_eq!(first.text().as_deref(), Some("first content"));
        assert_eq!(second.text().as_deref(), Some("fake-content"));
        assert_eq!(second.mime_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn store_lookups_default_to_a_fake_name() {
        let fakes = FakeContext::new();
        fakes.fake_stores(FakeReplies::new());
        let gateway = FakeStoreGateway::new(fakes.clone());

        let store = gateway.get_store(&context(), "vs_1").await.unwrap();
        assert_eq!(store.id, "vs_1");
        assert_eq!(store.name.as_deref(), Some("fake-store"));

        gateway.delete_store(&context(), "vs_1").await.unwrap();
        fakes.assert_store_deleted("vs_1");
    }
}
