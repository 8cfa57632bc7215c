//! Deferred execution of operations.
//!
//! `queue(..)` on an agent or pending builder produces a [`PendingDispatch`]
//! holding a serializable [`QueuedOperation`] with the same parameters as the
//! synchronous call. Callbacks registered with `then` and `catch` run when a
//! worker finishes the operation. A [`Dispatcher`] decides where that worker
//! lives: [`TokioDispatcher`] spawns it on the current runtime, while an
//! external queue can persist [`QueuedOperation`] and later hand it to
//! [`Ai::run_queued`].

use crate::agent::{Agent, AgentKey};
use crate::ai::Ai;
use crate::api::{Capability, ProviderModelList};
use crate::data::Attachment;
use crate::error::{AiError, Result};
use crate::response::{
    AgentResponse, AudioResponse, EmbeddingsResponse, ImageResponse, RerankingResponse,
    TranscriptionResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAgentPrompt {
    pub agent: AgentKey,
    pub prompt: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderModelList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl QueuedAgentPrompt {
    pub fn contains(&self, needle: &str) -> bool {
        self.prompt.contains(needle)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueuedEmbeddingsPrompt {
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(default)]
    pub cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderModelList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl QueuedEmbeddingsPrompt {
    pub fn contains(&self, needle: &str) -> bool {
        self.inputs.iter().any(|input| input.contains(needle))
    }

    pub fn count(&self) -> usize {
        self.inputs.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueuedImagePrompt {
    pub prompt: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderModelList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl QueuedImagePrompt {
    pub fn contains(&self, needle: &str) -> bool {
        self.prompt.contains(needle)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueuedAudioPrompt {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderModelList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl QueuedAudioPrompt {
    pub fn contains(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTranscriptionPrompt {
    pub audio: Attachment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub diarize: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderModelList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueuedRerankingPrompt {
    pub query: String,
    pub documents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderModelList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl QueuedRerankingPrompt {
    pub fn contains(&self, needle: &str) -> bool {
        self.query.contains(needle)
    }
}

/// An operation waiting for a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum QueuedOperation {
    Prompt(QueuedAgentPrompt),
    Embeddings(QueuedEmbeddingsPrompt),
    Image(QueuedImagePrompt),
    Audio(QueuedAudioPrompt),
    Transcription(QueuedTranscriptionPrompt),
    Reranking(QueuedRerankingPrompt),
}

impl QueuedOperation {
    pub fn capability(&self) -> Capability {
        match self {
            Self::Prompt(_) => Capability::Text,
            Self::Embeddings(_) => Capability::Embeddings,
            Self::Image(_) => Capability::Image,
            Self::Audio(_) => Capability::Audio,
            Self::Transcription(_) => Capability::Transcription,
            Self::Reranking(_) => Capability::Reranking,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Result of a queued operation, by kind.
#[derive(Debug, Clone)]
pub enum QueuedResponse {
    Text(AgentResponse),
    Embeddings(EmbeddingsResponse),
    Image(ImageResponse),
    Audio(AudioResponse),
    Transcription(TranscriptionResponse),
    Reranking(RerankingResponse),
}

type Then = Box<dyn FnOnce(&QueuedResponse) + Send>;
type Catch = Box<dyn FnOnce(&AiError) + Send>;

/// A queued operation plus what to do when it finishes.
///
/// Nothing happens until [`dispatch`](Self::dispatch) is called.
#[must_use = "queued operations do nothing until dispatched"]
pub struct PendingDispatch {
    ai: Ai,
    operation: QueuedOperation,
    agent: Option<Arc<dyn Agent>>,
    then: Vec<Then>,
    catch: Vec<Catch>,
}

impl PendingDispatch {
    pub(crate) fn new(ai: Ai, operation: QueuedOperation) -> Self {
        Self {
            ai,
            operation,
            agent: None,
            then: Vec::new(),
            catch: Vec::new(),
        }
    }

    /// Keep the live agent so an in-process worker does not need it
    /// registered.
    pub(crate) fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn operation(&self) -> &QueuedOperation {
        &self.operation
    }

    /// Run `callback` with the response once the operation succeeds.
    pub fn then(mut self, callback: impl FnOnce(&QueuedResponse) + Send + 'static) -> Self {
        self.then.push(Box::new(callback));
        self
    }

    /// Run `callback` with the error if the operation fails.
    pub fn catch(mut self, callback: impl FnOnce(&AiError) + Send + 'static) -> Self {
        self.catch.push(Box::new(callback));
        self
    }

    /// Hand the operation to the configured dispatcher, or record it when
    /// its agent or capability is faked.
    pub fn dispatch(self) -> Result<()> {
        let ai = self.ai.clone();
        if let Some(fakes) = ai.fakes()
            && fakes.intercepts_queued(&self.operation)
        {
            fakes.record_queued(self.operation);
            return Ok(());
        }
        tracing::debug!(capability = %self.operation.capability(), "Dispatching queued operation");
        ai.dispatcher().dispatch(self)
    }

    /// Execute the operation now and run the callbacks. Called by workers.
    pub async fn run(self) -> Result<()> {
        let result = match (&self.operation, &self.agent) {
            (QueuedOperation::Prompt(prompt), Some(agent)) => self
                .ai
                .run_queued_prompt(agent.clone(), prompt.clone())
                .await
                .map(QueuedResponse::Text),
            _ => self.ai.run_queued(self.operation.clone()).await,
        };

        match result {
            Ok(response) => {
                for callback in self.then {
                    callback(&response);
                }
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    capability = %self.operation.capability(),
                    error = %error,
                    "Queued operation failed"
                );
                if self.catch.is_empty() {
                    return Err(error);
                }
                for callback in self.catch {
                    callback(&error);
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for PendingDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingDispatch")
            .field("operation", &self.operation)
            .field("then", &self.then.len())
            .field("catch", &self.catch.len())
            .finish()
    }
}

/// Where queued operations go.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: PendingDispatch) -> Result<()>;
}

/// Runs each queued operation as a task on the current Tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDispatcher;

impl Dispatcher for TokioDispatcher {
    fn dispatch(&self, job: PendingDispatch) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            AiError::Config("Queued operations need a running Tokio runtime.".to_string())
        })?;
        handle.spawn(async move {
            if let Err(e) = job.run().await {
                tracing::error!(error = %e, "Queued operation failed with no catch callback");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operations_serialize_with_a_tag() {
        let op = QueuedOperation::Embeddings(QueuedEmbeddingsPrompt {
            inputs: vec!["hello".into()],
            dimensions: Some(256),
            ..QueuedEmbeddingsPrompt::default()
        });
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["operation"], json!("embeddings"));
        assert_eq!(value["dimensions"], json!(256));
        assert_eq!(QueuedOperation::from_json(&op.to_json().unwrap()).unwrap(), op);
    }

    #[test]
    fn agent_prompts_round_trip_with_attachments() {
        let op = QueuedOperation::Prompt(QueuedAgentPrompt {
            agent: AgentKey::named("support"),
            prompt: "Summarize".into(),
            attachments: vec![Attachment::document_url("https://example.com/a.pdf")],
            provider: Some(ProviderModelList::from(["anthropic", "openai"])),
            model: None,
        });
        let restored = QueuedOperation::from_json(&op.to_json().unwrap()).unwrap();
        assert_eq!(restored, op);
        assert_eq!(restored.capability(), Capability::Text);
    }
}
