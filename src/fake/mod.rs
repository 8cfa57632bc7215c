//! Deterministic stand-ins for every gateway, for tests.
//!
//! A [`FakeContext`] is created by the test and handed to
//! [`AiBuilder::fake`](crate::ai::AiBuilder::fake). Faking a capability (or an
//! agent, keyed by [`AgentKey`](crate::agent::AgentKey)) swaps the resolved
//! provider's gateway for one that answers from [`FakeReplies`] and records
//! every call, so the test can assert on it afterwards.
//!
//! Each call is answered by, in order:
//!
//! 1. the next entry of the fixed reply list,
//! 2. the fallback closure, once the list is used up,
//! 3. a synthesized default value,
//!
//! unless stray operations are prevented, in which case step 3 becomes an
//! [`AiError::StrayOperation`].

mod context;
mod gateways;

pub use context::FakeContext;
pub use gateways::{
    DEFAULT_FAKE_DIMENSIONS, FakeAudioGateway, FakeEmbeddingGateway, FakeFileGateway, FakeImageGateway,
    FakeRerankingGateway, FakeStoreGateway, FakeTextGateway, FakeTranscriptionGateway,
};

use crate::data::{GeneratedImage, RankedDocument};
use crate::error::{AiError, Result};
use crate::response::{
    AgentResponse, AudioResponse, EmbeddingsResponse, FileResponse, ImageResponse,
    RerankingResponse, StoreResponse, TranscriptionResponse,
};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Closure form of a reply. Receives the prompt (or id) being answered.
pub type ReplyFn<I, R> = Arc<dyn Fn(&I) -> Result<R> + Send + Sync>;

/// One prepared answer.
pub enum Reply<I, R> {
    Value(R),
    Fail(AiError),
    With(ReplyFn<I, R>),
}

impl<I, R> Reply<I, R> {
    /// Compute the reply from the input.
    pub fn with<T, F>(f: F) -> Self
    where
        T: Into<R>,
        F: Fn(&I) -> Result<T> + Send + Sync + 'static,
    {
        Reply::With(Arc::new(move |input| f(input).map(Into::into)))
    }

    /// Fail the call with `error`, e.g. a rate limit to exercise failover.
    pub fn fail(error: AiError) -> Self {
        Reply::Fail(error)
    }

    pub(crate) fn resolve(self, input: &I) -> Result<R> {
        match self {
            Reply::Value(value) => Ok(value),
            Reply::Fail(error) => Err(error),
            Reply::With(f) => f(input),
        }
    }
}

impl<I, R> From<R> for Reply<I, R> {
    fn from(value: R) -> Self {
        Reply::Value(value)
    }
}

/// What a faked agent answers with.
#[derive(Debug, Clone)]
pub enum FakeText {
    Text(String),
    /// Structured output; serialized into the response text as well.
    Structured(Map<String, Value>),
    Response(AgentResponse),
}

impl From<&str> for FakeText {
    fn from(text: &str) -> Self {
        FakeText::Text(text.to_string())
    }
}

impl From<String> for FakeText {
    fn from(text: String) -> Self {
        FakeText::Text(text)
    }
}

impl From<AgentResponse> for FakeText {
    fn from(response: AgentResponse) -> Self {
        FakeText::Response(response)
    }
}

impl From<Value> for FakeText {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => FakeText::Structured(map),
            Value::String(text) => FakeText::Text(text),
            other => FakeText::Text(other.to_string()),
        }
    }
}

macro_rules! reply_from {
    ($target:ty: $($source:ty => |$v:ident| $convert:expr;)*) => {
        $(
            impl<I> From<$source> for Reply<I, $target> {
                fn from($v: $source) -> Self {
                    Reply::Value($convert)
                }
            }
        )*
    };
}

reply_from! { FakeText:
    &str => |v| v.into();
    String => |v| v.into();
    AgentResponse => |v| v.into();
    Value => |v| v.into();
}

reply_from! { EmbeddingsResponse:
    Vec<Vec<f32>> => |v| EmbeddingsResponse { embeddings: v, ..EmbeddingsResponse::default() };
}

reply_from! { ImageResponse:
    &str => |v| image_response(v.to_string());
    String => |v| image_response(v);
}

reply_from! { AudioResponse:
    &str => |v| AudioResponse { audio: v.to_string(), ..AudioResponse::default() };
    String => |v| AudioResponse { audio: v, ..AudioResponse::default() };
}

reply_from! { TranscriptionResponse:
    &str => |v| TranscriptionResponse { text: v.to_string(), ..TranscriptionResponse::default() };
    String => |v| TranscriptionResponse { text: v, ..TranscriptionResponse::default() };
}

reply_from! { RerankingResponse:
    Vec<RankedDocument> => |v| RerankingResponse { results: v, ..RerankingResponse::default() };
}

// File and store replies given as plain strings are the content and the store
// name; the id is filled in from the request.
reply_from! { FileResponse:
    &str => |v| text_file(v.as_bytes().to_vec());
    String => |v| text_file(v.into_bytes());
}

reply_from! { StoreResponse:
    &str => |v| named_store(v.to_string());
    String => |v| named_store(v);
}

fn image_response(image: String) -> ImageResponse {
    ImageResponse {
        images: vec![GeneratedImage {
            image,
            mime_type: Some("image/png".to_string()),
        }],
        ..ImageResponse::default()
    }
}

fn text_file(content: Vec<u8>) -> FileResponse {
    FileResponse {
        id: String::new(),
        content: Some(content),
        mime_type: Some("text/plain".to_string()),
    }
}

fn named_store(name: String) -> StoreResponse {
    StoreResponse {
        name: Some(name),
        ready: true,
        ..StoreResponse::default()
    }
}

/// The replies prepared for one faked capability or agent.
pub struct FakeReplies<I, R> {
    replies: VecDeque<Reply<I, R>>,
    fallback: Option<ReplyFn<I, R>>,
    prevent_stray: bool,
}

impl<I, R> Default for FakeReplies<I, R> {
    fn default() -> Self {
        Self {
            replies: VecDeque::new(),
            fallback: None,
            prevent_stray: false,
        }
    }
}

pub(crate) enum Answer<I, R> {
    Reply(Reply<I, R>),
    Default,
}

impl<I, R> FakeReplies<I, R> {
    /// No prepared replies; every call gets the synthesized default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer calls with `replies`, one per call, in order.
    pub fn sequence(replies: impl IntoIterator<Item = Reply<I, R>>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Answer every call with `f`.
    pub fn using<T, F>(f: F) -> Self
    where
        T: Into<R>,
        F: Fn(&I) -> Result<T> + Send + Sync + 'static,
    {
        Self::new().otherwise(f)
    }

    /// Answer calls past the end of the sequence with `f`.
    pub fn otherwise<T, F>(mut self, f: F) -> Self
    where
        T: Into<R>,
        F: Fn(&I) -> Result<T> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(move |input| f(input).map(Into::into)));
        self
    }

    /// Fail calls that have no prepared reply instead of synthesizing one.
    pub fn prevent_stray(mut self) -> Self {
        self.prevent_stray = true;
        self
    }

    pub(crate) fn next(&mut self, operation: &str) -> Result<Answer<I, R>> {
        if let Some(reply) = self.replies.pop_front() {
            return Ok(Answer::Reply(reply));
        }
        if let Some(f) = &self.fallback {
            return Ok(Answer::Reply(Reply::With(f.clone())));
        }
        if self.prevent_stray {
            return Err(AiError::StrayOperation(format!(
                "Attempted {} without a fake response.",
                operation
            )));
        }
        Ok(Answer::Default)
    }
}

impl<I, R> From<Vec<Reply<I, R>>> for FakeReplies<I, R> {
    fn from(replies: Vec<Reply<I, R>>) -> Self {
        Self::sequence(replies)
    }
}

/// A deterministic unit-length vector derived from `input`.
pub fn fake_embedding(input: &str, dimensions: u32) -> Vec<f32> {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    let mut state = hasher.finish() | 1;

    let raw: Vec<f32> = (0..dimensions)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
        })
        .collect();

    let magnitude = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if magnitude == 0.0 {
        return raw;
    }
    raw.into_iter().map(|v| v / magnitude).collect()
}

/// A value that satisfies `schema`, for faking structured output.
///
/// Enums yield their first member, numbers their minimum (or zero), arrays
/// `minItems` elements (at least one), and objects every declared property.
pub fn fake_value_for_schema(schema: &Value) -> Value {
    if let Some(first) = schema
        .get("enum")
        .and_then(Value::as_array)
        .and_then(|members| members.first())
    {
        return first.clone();
    }

    let kind = match schema.get("type") {
        Some(Value::String(kind)) => kind.as_str(),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .filter_map(Value::as_str)
            .find(|kind| *kind != "null")
            .unwrap_or("null"),
        _ if schema.get("properties").is_some() => "object",
        _ => "string",
    };

    match kind {
        "object" => {
            let properties = schema
                .get("properties")
                .and_then(Value::as_object)
                .map(|properties| {
                    properties
                        .iter()
                        .map(|(name, property)| (name.clone(), fake_value_for_schema(property)))
                        .collect()
                })
                .unwrap_or_default();
            Value::Object(properties)
        }
        "array" => {
            let count = schema
                .get("minItems")
                .and_then(Value::as_u64)
                .unwrap_or(1)
                .max(1) as usize;
            let item = schema
                .get("items")
                .map(fake_value_for_schema)
                .unwrap_or(Value::Null);
            Value::Array(vec![item; count])
        }
        "integer" => schema
            .get("minimum")
            .and_then(Value::as_i64)
            .map(Value::from)
            .unwrap_or_else(|| Value::from(0)),
        "number" => schema
            .get("minimum")
            .cloned()
            .unwrap_or_else(|| Value::from(0.0)),
        "boolean" => Value::Bool(true),
        "null" => Value::Null,
        _ => Value::String("fake".to_string()),
    }
}
