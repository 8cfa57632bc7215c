//! Prompt values handed to gateways.
//!
//! Prompts are immutable: `revise` and `with_attachments` return new values
//! so middleware can reshape a prompt without touching the caller's copy.

use crate::agent::{Agent, AgentKey};
use crate::data::{Attachment, Message};
use crate::tool::ToolInvocationHooks;
use crate::traits::Tool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A prompt addressed to an agent, resolved against one provider and model.
#[derive(Clone)]
pub struct AgentPrompt {
    pub agent: Arc<dyn Agent>,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    pub provider: String,
    pub model: String,
}

impl AgentPrompt {
    pub fn new(
        agent: Arc<dyn Agent>,
        prompt: impl Into<String>,
        attachments: Vec<Attachment>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            prompt: prompt.into(),
            attachments,
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Replace the prompt text, and optionally the attachments.
    pub fn revise(&self, prompt: impl Into<String>, attachments: Option<Vec<Attachment>>) -> Self {
        Self {
            prompt: prompt.into(),
            attachments: attachments.unwrap_or_else(|| self.attachments.clone()),
            ..self.clone()
        }
    }

    /// Append attachments.
    pub fn with_attachments(&self, attachments: impl IntoIterator<Item = Attachment>) -> Self {
        let mut revised = self.clone();
        revised.attachments.extend(attachments);
        revised
    }

    pub fn agent_key(&self) -> AgentKey {
        self.agent.key()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.prompt.contains(needle)
    }
}

impl std::fmt::Debug for AgentPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentPrompt")
            .field("agent", &self.agent.key())
            .field("prompt", &self.prompt)
            .field("attachments", &self.attachments)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish()
    }
}

/// Generation knobs for text requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Upper bound on generation rounds when tools are in play.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

fn default_max_steps() -> u32 {
    5
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            max_tokens: None,
            temperature: None,
            max_steps: default_max_steps(),
        }
    }
}

/// Everything a [`TextGateway`](crate::traits::TextGateway) needs for one
/// invocation.
#[derive(Clone, Debug)]
pub struct TextRequest {
    pub invocation_id: String,
    pub prompt: AgentPrompt,
    pub instructions: String,
    /// Conversation so far, ending with the user message for this prompt.
    pub messages: Vec<Message>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub schema: Option<Value>,
    pub options: TextOptions,
    pub hooks: ToolInvocationHooks,
}

impl TextRequest {
    /// Assemble a request from the agent behind `prompt`.
    pub fn new(invocation_id: impl Into<String>, prompt: AgentPrompt) -> Self {
        let agent = prompt.agent.clone();
        let mut messages = agent.messages();
        messages.push(Message::User {
            content: prompt.prompt.clone(),
            attachments: prompt.attachments.clone(),
        });
        Self {
            invocation_id: invocation_id.into(),
            instructions: agent.instructions(),
            messages,
            tools: agent.tools(),
            schema: agent.schema(),
            options: agent.options(),
            hooks: ToolInvocationHooks::default(),
            prompt,
        }
    }

    /// Register callbacks fired around each tool execution of this request.
    pub fn on_tool_invocation(mut self, hooks: ToolInvocationHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn model(&self) -> &str {
        &self.prompt.model
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingsPrompt {
    pub inputs: Vec<String>,
    pub dimensions: u32,
    pub provider: String,
    pub model: String,
}

impl EmbeddingsPrompt {
    pub fn contains(&self, needle: &str) -> bool {
        self.inputs.iter().any(|input| input.contains(needle))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePrompt {
    pub prompt: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Aspect ratio: `"1:1"`, `"2:3"` or `"3:2"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// `"low"`, `"medium"` or `"high"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    pub provider: String,
    pub model: String,
}

impl ImagePrompt {
    pub fn contains(&self, needle: &str) -> bool {
        self.prompt.contains(needle)
    }
}

pub const DEFAULT_VOICE: &str = "default-female";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPrompt {
    pub text: String,
    pub voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub provider: String,
    pub model: String,
}

impl AudioPrompt {
    pub fn contains(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionPrompt {
    pub audio: Attachment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub diarize: bool,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankingPrompt {
    pub query: String,
    pub documents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    pub provider: String,
    pub model: String,
}

/// File contents to upload to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUpload {
    pub content: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl FileUpload {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            mime_type: None,
            name: None,
        }
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Parameters for creating a vector store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub file_ids: Vec<String>,
    /// Days of inactivity after which the store expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_after_days: Option<u32>,
}

impl StoreRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::agent;

    fn prompt() -> AgentPrompt {
        AgentPrompt::new(
            Arc::new(agent("Be brief.").messages(vec![Message::assistant("Earlier answer")])),
            "What is Rust?",
            vec![],
            "openai",
            "gpt-5-mini",
        )
    }

    #[test]
    fn revise_returns_a_new_prompt() {
        let original = prompt();
        let revised = original.revise("What is Go?", None);
        assert_eq!(original.prompt, "What is Rust?");
        assert_eq!(revised.prompt, "What is Go?");
        assert_eq!(revised.provider, "openai");
    }

    #[test]
    fn with_attachments_appends() {
        let original = prompt();
        let revised = original.with_attachments([Attachment::image_url("https://example.com/a.png")]);
        assert!(original.attachments.is_empty());
        assert_eq!(revised.attachments.len(), 1);
    }

    #[test]
    fn text_request_appends_the_user_message() {
        let request = TextRequest::new("inv", prompt());
        assert_eq!(request.instructions, "Be brief.");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1], Message::user("What is Rust?"));
        assert_eq!(request.options.max_steps, 5);
    }
}
