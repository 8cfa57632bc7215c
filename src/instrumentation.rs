//! Metrics and tracing around gateway calls.
//!
//! Every gateway a driver builds is wrapped before it is handed out, so
//! each call records:
//!
//! - `ai_gateway.duration_seconds` (histogram), labelled by capability and
//!   provider.
//! - `ai_gateway.total` (counter), labelled by capability, provider and
//!   status (`success`, `failover` or `failure`).
//!
//! For streams only the time to open the stream is measured.

use crate::api::Capability;
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
use crate::traits::{
    AudioGateway, EmbeddingGateway, FileGateway, ImageGateway, ProviderContext, ProviderGateways,
    RerankingGateway, StoreGateway, TextGateway, TranscriptionGateway,
};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

async fn measure<T>(
    capability: Capability,
    context: &ProviderContext,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    let start = Instant::now();
    let result = call.await;
    let duration = start.elapsed();

    let status = match &result {
        Ok(_) => "success",
        Err(e) if e.is_failoverable() => "failover",
        Err(_) => "failure",
    };
    if let Err(e) = &result {
        tracing::debug!(
            provider = %context.name,
            capability = %capability,
            error = %e,
            "Gateway call failed"
        );
    }

    metrics::histogram!(
        "ai_gateway.duration_seconds",
        "capability" => capability.as_str(),
        "provider" => context.name.clone()
    )
    .record(duration.as_secs_f64());

    metrics::counter!(
        "ai_gateway.total",
        "capability" => capability.as_str(),
        "provider" => context.name.clone(),
        "status" => status
    )
    .increment(1);

    result
}

/// Wrap every present gateway.
pub fn instrument(gateways: ProviderGateways) -> ProviderGateways {
    ProviderGateways {
        text: gateways
            .text
            .map(|inner| Arc::new(InstrumentedTextGateway { inner }) as Arc<dyn TextGateway>),
        image: gateways
            .image
            .map(|inner| Arc::new(InstrumentedImageGateway { inner }) as Arc<dyn ImageGateway>),
        audio: gateways
            .audio
            .map(|inner| Arc::new(InstrumentedAudioGateway { inner }) as Arc<dyn AudioGateway>),
        transcription: gateways.transcription.map(|inner| {
            Arc::new(InstrumentedTranscriptionGateway { inner }) as Arc<dyn TranscriptionGateway>
        }),
        embeddings: gateways.embeddings.map(|inner| {
            Arc::new(InstrumentedEmbeddingGateway { inner }) as Arc<dyn EmbeddingGateway>
        }),
        reranking: gateways.reranking.map(|inner| {
            Arc::new(InstrumentedRerankingGateway { inner }) as Arc<dyn RerankingGateway>
        }),
        files: gateways
            .files
            .map(|inner| Arc::new(InstrumentedFileGateway { inner }) as Arc<dyn FileGateway>),
        stores: gateways
            .stores
            .map(|inner| Arc::new(InstrumentedStoreGateway { inner }) as Arc<dyn StoreGateway>),
    }
}

pub struct InstrumentedTextGateway {
    pub inner: Arc<dyn TextGateway>,
}

#[async_trait]
impl TextGateway for InstrumentedTextGateway {
    async fn generate_text(
        &self,
        context: &ProviderContext,
        request: TextRequest,
    ) -> Result<AgentResponse> {
        measure(
            Capability::Text,
            context,
            self.inner.generate_text(context, request),
        )
        .await
    }

    async fn stream_text(
        &self,
        context: &ProviderContext,
        request: TextRequest,
    ) -> Result<EventStream> {
        measure(
            Capability::Text,
            context,
            self.inner.stream_text(context, request),
        )
        .await
    }
}

/// See [`InstrumentedTextGateway`].
pub struct InstrumentedImageGateway {
    pub inner: Arc<dyn ImageGateway>,
}

#[async_trait]
impl ImageGateway for InstrumentedImageGateway {
    async fn generate_image(
        &self,
        context: &ProviderContext,
        prompt: &ImagePrompt,
    ) -> Result<ImageResponse> {
        measure(
            Capability::Image,
            context,
            self.inner.generate_image(context, prompt),
        )
        .await
    }
}

/// See [`InstrumentedTextGateway`].
pub struct InstrumentedAudioGateway {
    pub inner: Arc<dyn AudioGateway>,
}

#[async_trait]
impl AudioGateway for InstrumentedAudioGateway {
    async fn generate_audio(
        &self,
        context: &ProviderContext,
        prompt: &AudioPrompt,
    ) -> Result<AudioResponse> {
        measure(
            Capability::Audio,
            context,
            self.inner.generate_audio(context, prompt),
        )
        .await
    }
}

/// See [`InstrumentedTextGateway`].
pub struct InstrumentedTranscriptionGateway {
    pub inner: Arc<dyn TranscriptionGateway>,
}

#[async_trait]
impl TranscriptionGateway for InstrumentedTranscriptionGateway {
    async fn generate_transcription(
        &self,
        context: &ProviderContext,
        prompt: &TranscriptionPrompt,
    ) -> Result<TranscriptionResponse> {
        measure(
            Capability::Transcription,
            context,
            self.inner.generate_transcription(context, prompt),
        )
        .await
    }
}

/// See [`InstrumentedTextGateway`].
pub struct InstrumentedEmbeddingGateway {
    pub inner: Arc<dyn EmbeddingGateway>,
}

#[async_trait]
impl EmbeddingGateway for InstrumentedEmbeddingGateway {
    async fn generate_embeddings(
        &self,
        context: &ProviderContext,
        prompt: &EmbeddingsPrompt,
    ) -> Result<EmbeddingsResponse> {
        measure(
            Capability::Embeddings,
            context,
            self.inner.generate_embeddings(context, prompt),
        )
        .await
    }
}

/// See [`InstrumentedTextGateway`].
pub struct InstrumentedRerankingGateway {
    pub inner: Arc<dyn RerankingGateway>,
}

#[async_trait]
impl RerankingGateway for InstrumentedRerankingGateway {
    async fn rerank(
        &self,
        context: &ProviderContext,
        prompt: &RerankingPrompt,
    ) -> Result<RerankingResponse> {
        measure(
            Capability::Reranking,
            context,
            self.inner.rerank(context, prompt),
        )
        .await
    }
}

/// See [`InstrumentedTextGateway`].
pub struct InstrumentedFileGateway {
    pub inner: Arc<dyn FileGateway>,
}

#[async_trait]
impl FileGateway for InstrumentedFileGateway {
    async fn put_file(
        &self,
        context: &ProviderContext,
        file: &FileUpload,
    ) -> Result<StoredFileResponse> {
        measure(Capability::Files, context, self.inner.put_file(context, file)).await
    }

    async fn get_file(&self, context: &ProviderContext, file_id: &str) -> Result<FileResponse> {
        measure(Capability::Files, context, self.inner.get_file(context, file_id)).await
    }

    async fn delete_file(&self, context: &ProviderContext, file_id: &str) -> Result<()> {
        measure(Capability::Files, context, self.inner.delete_file(context, file_id)).await
    }
}

/// See [`InstrumentedTextGateway`].
pub struct InstrumentedStoreGateway {
    pub inner: Arc<dyn StoreGateway>,
}

#[async_trait]
impl StoreGateway for InstrumentedStoreGateway {
    async fn create_store(
        &self,
        context: &ProviderContext,
        request: &StoreRequest,
    ) -> Result<StoreResponse> {
        measure(Capability::Stores, context, self.inner.create_store(context, request)).await
    }

    async fn get_store(&self, context: &ProviderContext, store_id: &str) -> Result<StoreResponse> {
        measure(Capability::Stores, context, self.inner.get_store(context, store_id)).await
    }

    async fn delete_store(&self, context: &ProviderContext, store_id: &str) -> Result<bool> {
        measure(Capability::Stores, context, self.inner.delete_store(context, store_id)).await
    }

    async fn add_file(
        &self,
        context: &ProviderContext,
        store_id: &str,
        file_id: &str,
    ) -> Result<()> {
        measure(
            Capability::Stores,
            context,
            self.inner.add_file(context, store_id, file_id),
        )
        .await
    }

    async fn remove_file(
        &self,
        context: &ProviderContext,
        store_id: &str,
        file_id: &str,
    ) -> Result<bool> {
        measure(
            Capability::Stores,
            context,
            self.inner.remove_file(context, store_id, file_id),
        )
        .await
    }
}
