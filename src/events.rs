//! Lifecycle events and the bus that fans them out to listeners.

use crate::agent::AgentKey;
use crate::data::{ToolCall, ToolResult};
use crate::prompt::{
    AgentPrompt, AudioPrompt, EmbeddingsPrompt, FileUpload, ImagePrompt, RerankingPrompt,
    StoreRequest, TranscriptionPrompt,
};
use crate::response::{
    AgentResponse, AudioResponse, EmbeddingsResponse, ImageResponse, RerankingResponse,
    StoreResponse, StoredFileResponse, StreamedAgentResponse, TranscriptionResponse,
};
use std::sync::{Arc, RwLock};

/// Everything observable about an operation's lifecycle.
///
/// "Before" events carry the prompt; "after" events also carry the response.
/// Failover events carry the rendered error of the attempt that was skipped.
#[derive(Debug, Clone)]
pub enum AiEvent {
    InvokingAgent {
        invocation_id: String,
        prompt: AgentPrompt,
    },
    AgentInvoked {
        invocation_id: String,
        prompt: AgentPrompt,
        response: AgentResponse,
    },
    StreamingAgent {
        invocation_id: String,
        prompt: AgentPrompt,
    },
    AgentStreamed {
        invocation_id: String,
        prompt: AgentPrompt,
        response: StreamedAgentResponse,
    },
    InvokingTool {
        invocation_id: String,
        agent: AgentKey,
        tool_call: ToolCall,
    },
    ToolInvoked {
        invocation_id: String,
        agent: AgentKey,
        tool_call: ToolCall,
        tool_result: ToolResult,
    },
    AgentFailedOver {
        agent: AgentKey,
        provider: String,
        model: String,
        error: String,
    },
    ProviderFailedOver {
        provider: String,
        model: String,
        error: String,
    },
    GeneratingEmbeddings {
        invocation_id: String,
        prompt: EmbeddingsPrompt,
    },
    EmbeddingsGenerated {
        invocation_id: String,
        prompt: EmbeddingsPrompt,
        response: EmbeddingsResponse,
    },
    GeneratingImage {
        invocation_id: String,
        prompt: ImagePrompt,
    },
    ImageGenerated {
        invocation_id: String,
        prompt: ImagePrompt,
        response: ImageResponse,
    },
    GeneratingAudio {
        invocation_id: String,
        prompt: AudioPrompt,
    },
    AudioGenerated {
        invocation_id: String,
        prompt: AudioPrompt,
        response: AudioResponse,
    },
    GeneratingTranscription {
        invocation_id: String,
        prompt: TranscriptionPrompt,
    },
    TranscriptionGenerated {
        invocation_id: String,
        prompt: TranscriptionPrompt,
        response: TranscriptionResponse,
    },
    Reranking {
        invocation_id: String,
        prompt: RerankingPrompt,
    },
    Reranked {
        invocation_id: String,
        prompt: RerankingPrompt,
        response: RerankingResponse,
    },
    StoringFile {
        invocation_id: String,
        provider: String,
        file: FileUpload,
    },
    FileStored {
        invocation_id: String,
        provider: String,
        file: FileUpload,
        response: StoredFileResponse,
    },
    FileDeleted {
        invocation_id: String,
        provider: String,
        file_id: String,
    },
    CreatingStore {
        invocation_id: String,
        provider: String,
        request: StoreRequest,
    },
    StoreCreated {
        invocation_id: String,
        provider: String,
        request: StoreRequest,
        response: StoreResponse,
    },
    StoreDeleted {
        invocation_id: String,
        provider: String,
        store_id: String,
    },
    FileAddedToStore {
        invocation_id: String,
        provider: String,
        store_id: String,
        file_id: String,
    },
    FileRemovedFromStore {
        invocation_id: String,
        provider: String,
        store_id: String,
        file_id: String,
    },
}

impl AiEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvokingAgent { .. } => "InvokingAgent",
            Self::AgentInvoked { .. } => "AgentInvoked",
            Self::StreamingAgent { .. } => "StreamingAgent",
            Self::AgentStreamed { .. } => "AgentStreamed",
            Self::InvokingTool { .. } => "InvokingTool",
            Self::ToolInvoked { .. } => "ToolInvoked",
            Self::AgentFailedOver { .. } => "AgentFailedOver",
            Self::ProviderFailedOver { .. } => "ProviderFailedOver",
            Self::GeneratingEmbeddings { .. } => "GeneratingEmbeddings",
            Self::EmbeddingsGenerated { .. } => "EmbeddingsGenerated",
            Self::GeneratingImage { .. } => "GeneratingImage",
            Self::ImageGenerated { .. } => "ImageGenerated",
            Self::GeneratingAudio { .. } => "GeneratingAudio",
            Self::AudioGenerated { .. } => "AudioGenerated",
            Self::GeneratingTranscription { .. } => "GeneratingTranscription",
            Self::TranscriptionGenerated { .. } => "TranscriptionGenerated",
            Self::Reranking { .. } => "Reranking",
            Self::Reranked { .. } => "Reranked",
            Self::StoringFile { .. } => "StoringFile",
            Self::FileStored { .. } => "FileStored",
            Self::FileDeleted { .. } => "FileDeleted",
            Self::CreatingStore { .. } => "CreatingStore",
            Self::StoreCreated { .. } => "StoreCreated",
            Self::StoreDeleted { .. } => "StoreDeleted",
            Self::FileAddedToStore { .. } => "FileAddedToStore",
            Self::FileRemovedFromStore { .. } => "FileRemovedFromStore",
        }
    }

    /// `None` for failover events, which belong to no single invocation.
    pub fn invocation_id(&self) -> Option<&str> {
        match self {
            Self::AgentFailedOver { .. } | Self::ProviderFailedOver { .. } => None,
            Self::InvokingAgent { invocation_id, .. }
            | Self::AgentInvoked { invocation_id, .. }
            | Self::StreamingAgent { invocation_id, .. }
            | Self::AgentStreamed { invocation_id, .. }
            | Self::InvokingTool { invocation_id, .. }
            | Self::ToolInvoked { invocation_id, .. }
            | Self::GeneratingEmbeddings { invocation_id, .. }
            | Self::EmbeddingsGenerated { invocation_id, .. }
            | Self::GeneratingImage { invocation_id, .. }
            | Self::ImageGenerated { invocation_id, .. }
            | Self::GeneratingAudio { invocation_id, .. }
            | Self::AudioGenerated { invocation_id, .. }
            | Self::GeneratingTranscription { invocation_id, .. }
            | Self::TranscriptionGenerated { invocation_id, .. }
            | Self::Reranking { invocation_id, .. }
            | Self::Reranked { invocation_id, .. }
            | Self::StoringFile { invocation_id, .. }
            | Self::FileStored { invocation_id, .. }
            | Self::FileDeleted { invocation_id, .. }
            | Self::CreatingStore { invocation_id, .. }
            | Self::StoreCreated { invocation_id, .. }
            | Self::StoreDeleted { invocation_id, .. }
            | Self::FileAddedToStore { invocation_id, .. }
            | Self::FileRemovedFromStore { invocation_id, .. } => Some(invocation_id),
        }
    }

    pub fn is_failover(&self) -> bool {
        matches!(self, Self::AgentFailedOver { .. } | Self::ProviderFailedOver { .. })
    }
}

pub trait EventListener: Send + Sync {
    fn handle(&self, event: &AiEvent);
}

impl<F> EventListener for F
where
    F: Fn(&AiEvent) + Send + Sync,
{
    fn handle(&self, event: &AiEvent) {
        self(event)
    }
}

/// Synchronous fan-out to registered listeners, in registration order.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn EventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(&self, listener: impl EventListener + 'static) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(listener));
    }

    pub fn dispatch(&self, event: AiEvent) {
        tracing::trace!(event = event.name(), invocation_id = ?event.invocation_id(), "Dispatching event");
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            listener.handle(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
