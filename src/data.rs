//! Plain data values shared by prompts, responses, and stream events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Token counters reported by a vendor.
///
/// `Usage` forms a commutative monoid under field-wise addition with
/// [`Usage::default`] (all zeros) as the identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cache_write_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            ..Self::default()
        }
    }

    /// Sum of prompt and completion tokens.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            cache_write_input_tokens: self.cache_write_input_tokens + rhs.cache_write_input_tokens,
            cache_read_input_tokens: self.cache_read_input_tokens + rhs.cache_read_input_tokens,
            reasoning_tokens: self.reasoning_tokens + rhs.reasoning_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

impl Sum for Usage {
    fn sum<I: Iterator<Item = Usage>>(iter: I) -> Usage {
        iter.fold(Usage::default(), Add::add)
    }
}

impl<'a> Sum<&'a Usage> for Usage {
    fn sum<I: Iterator<Item = &'a Usage>>(iter: I) -> Usage {
        iter.copied().sum()
    }
}

/// The provider and model that actually served a request.
///
/// Failover may pick a pair other than the caller's first choice, so every
/// response records the one that answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl Meta {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            model: Some(model.into()),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_summary: Option<Map<String, Value>>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            result_id: None,
            reasoning_id: None,
            reasoning_summary: None,
        }
    }

    pub fn with_result_id(mut self, result_id: impl Into<String>) -> Self {
        self.result_id = Some(result_id.into());
        self
    }
}

/// The captured output of a tool, correlated with its [`ToolCall`] by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
}

impl ToolResult {
    pub fn for_call(call: &ToolCall, result: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            result: result.into(),
            result_id: call.result_id.clone(),
        }
    }
}

/// A source cited by the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Why a generation round stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    #[default]
    Unknown,
}

impl FinishReason {
    /// Map a vendor finish/stop reason string onto the closed set.
    pub fn from_vendor(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "STOP" | "completed" | "COMPLETE" | "stop_sequence" => Self::Stop,
            "length" | "max_tokens" | "MAX_TOKENS" | "incomplete" => Self::Length,
            "tool_calls" | "tool_use" | "TOOL_CALL" => Self::ToolCalls,
            "content_filter" | "SAFETY" | "RECITATION" | "refusal" => Self::ContentFilter,
            "error" | "failed" => Self::Error,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an [`Attachment`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Document,
    Audio,
}

/// Where an [`Attachment`]'s bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum AttachmentSource {
    Base64 {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Path {
        path: String,
    },
    Url {
        url: String,
    },
    /// A file previously uploaded to the provider.
    ProviderFile {
        id: String,
    },
    /// A file on an application storage disk.
    Stored {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disk: Option<String>,
    },
}

/// A file sent alongside a prompt.
///
/// Attachments are serializable so queued operations can carry them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    #[serde(flatten)]
    pub source: AttachmentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Attachment {
    pub fn new(kind: AttachmentKind, source: AttachmentSource) -> Self {
        Self {
            kind,
            source,
            name: None,
        }
    }

    pub fn image_base64(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::new(
            AttachmentKind::Image,
            AttachmentSource::Base64 {
                data: data.into(),
                mime_type: Some(mime_type.into()),
            },
        )
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        Self::new(AttachmentKind::Image, AttachmentSource::Url { url: url.into() })
    }

    pub fn image_path(path: impl Into<String>) -> Self {
        Self::new(AttachmentKind::Image, AttachmentSource::Path { path: path.into() })
    }

    pub fn document_base64(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::new(
            AttachmentKind::Document,
            AttachmentSource::Base64 {
                data: data.into(),
                mime_type: Some(mime_type.into()),
            },
        )
    }

    pub fn document_url(url: impl Into<String>) -> Self {
        Self::new(AttachmentKind::Document, AttachmentSource::Url { url: url.into() })
    }

    pub fn document_path(path: impl Into<String>) -> Self {
        Self::new(AttachmentKind::Document, AttachmentSource::Path { path: path.into() })
    }

    pub fn provider_file(kind: AttachmentKind, id: impl Into<String>) -> Self {
        Self::new(kind, AttachmentSource::ProviderFile { id: id.into() })
    }

    pub fn stored(kind: AttachmentKind, path: impl Into<String>, disk: Option<String>) -> Self {
        Self::new(
            kind,
            AttachmentSource::Stored {
                path: path.into(),
                disk,
            },
        )
    }

    pub fn audio_base64(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::new(
            AttachmentKind::Audio,
            AttachmentSource::Base64 {
                data: data.into(),
                mime_type: Some(mime_type.into()),
            },
        )
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The MIME type, when the source declares one.
    pub fn mime_type(&self) -> Option<&str> {
        match &self.source {
            AttachmentSource::Base64 { mime_type, .. } => mime_type.as_deref(),
            _ => None,
        }
    }
}

/// A message in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        results: Vec<ToolResult>,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}

/// One generation round of a tool loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub meta: Meta,
}

/// A single generated image, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A diarized slice of a transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub start: f64,
    pub end: f64,
}

/// A document with its relevance score, as returned by a reranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDocument {
    /// Zero-based index into the documents passed to the reranker.
    pub index: usize,
    pub document: String,
    pub score: f64,
}

/// File processing counts reported for a vector store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFileCounts {
    pub completed: u64,
    pub pending: u64,
    pub failed: u64,
}
