//! Response types returned by gateways and the [`Ai`](crate::ai::Ai) facade.

use crate::data::{
    FinishReason, GeneratedImage, Meta, RankedDocument, Step, StoreFileCounts, ToolCall,
    ToolResult, TranscriptionSegment, Usage,
};
use crate::error::Result;
use crate::streaming::sse::{self, SseStream};
use crate::streaming::{EventStream, StreamEnd, StreamEvent, TextDelta};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result of a synchronous agent prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub invocation_id: String,
    pub text: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    /// Parsed payload for agents with structured output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Map<String, Value>>,
    #[serde(default)]
    pub finish_reason: FinishReason,
}

impl AgentResponse {
    pub fn new(invocation_id: impl Into<String>, text: impl Into<String>, usage: Usage, meta: Meta) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            text: text.into(),
            usage,
            meta,
            finish_reason: FinishReason::Stop,
            ..Self::default()
        }
    }

    /// View the response as structured output. Falls back to parsing the
    /// text as a JSON object when the gateway did not parse it already.
    pub fn into_structured(self) -> Result<StructuredAgentResponse> {
        let structured = match &self.structured {
            Some(map) => map.clone(),
            None => serde_json::from_str(&self.text)?,
        };
        Ok(StructuredAgentResponse {
            response: self,
            structured,
        })
    }
}

impl std::fmt::Display for AgentResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// An agent response whose payload is a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredAgentResponse {
    response: AgentResponse,
    structured: Map<String, Value>,
}

impl StructuredAgentResponse {
    pub fn structured(&self) -> &Map<String, Value> {
        &self.structured
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.structured.get(key)
    }

    pub fn into_inner(self) -> AgentResponse {
        self.response
    }
}

impl std::ops::Deref for StructuredAgentResponse {
    type Target = AgentResponse;

    fn deref(&self) -> &AgentResponse {
        &self.response
    }
}

impl std::ops::Index<&str> for StructuredAgentResponse {
    type Output = Value;

    /// Missing keys index to `null`.
    fn index(&self, key: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.structured.get(key).unwrap_or(&NULL)
    }
}

/// A fully drained stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamedAgentResponse {
    pub invocation_id: String,
    pub events: Vec<StreamEvent>,
    pub text: String,
    /// `None` when the stream ended without a stream end event.
    pub usage: Option<Usage>,
    pub meta: Meta,
}

impl StreamedAgentResponse {
    pub fn from_events(invocation_id: impl Into<String>, events: Vec<StreamEvent>, meta: Meta) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            text: TextDelta::combine(&events),
            usage: StreamEnd::combine_usage(&events),
            events,
            meta,
        }
    }
}

type ThenCallback = Box<dyn FnOnce(&StreamedAgentResponse) + Send>;

/// A lazily consumed agent stream.
///
/// Events are pulled from the vendor on demand and cached, so iterating a
/// second time replays the cache instead of calling the vendor again. An
/// iteration abandoned part-way resumes where it stopped on the next pass.
/// `text` and `usage` are only populated once the stream has fully drained.
pub struct StreamableAgentResponse {
    pub invocation_id: String,
    pub meta: Meta,
    source: Option<EventStream>,
    events: Vec<StreamEvent>,
    completed: bool,
    text: Option<String>,
    usage: Option<Usage>,
    then_callbacks: Vec<ThenCallback>,
}

impl StreamableAgentResponse {
    pub fn new(invocation_id: impl Into<String>, meta: Meta, source: EventStream) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            meta,
            source: Some(source),
            events: Vec::new(),
            completed: false,
            text: None,
            usage: None,
            then_callbacks: Vec::new(),
        }
    }

    /// Replay the cached events, then continue pulling from the vendor.
    pub fn events(&mut self) -> impl Stream<Item = Result<StreamEvent>> + Send + '_ {
        async_stream::try_stream! {
            let mut index = 0;
            loop {
                if let Some(event) = self.events.get(index) {
                    index += 1;
                    yield event.clone();
                    continue;
                }
                let Some(source) = self.source.as_mut() else {
                    break;
                };
                match source.next().await {
                    Some(Ok(event)) => self.events.push(event),
                    Some(Err(e)) => {
                        self.source = None;
                        Err::<(), _>(e)?;
                    }
                    None => {
                        self.source = None;
                        self.complete();
                    }
                }
            }
        }
    }

    /// Visit each event until the callback returns `false`.
    pub async fn each(&mut self, mut callback: impl FnMut(&StreamEvent) -> bool + Send) -> Result<()> {
        let events = self.events();
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            if !callback(&event?) {
                break;
            }
        }
        Ok(())
    }

    /// Drain the stream and return the materialized response.
    pub async fn collect(&mut self) -> Result<StreamedAgentResponse> {
        self.each(|_| true).await?;
        Ok(self.snapshot())
    }

    /// Run `callback` once the stream has fully drained. Runs immediately if
    /// it already has.
    pub fn then(mut self, callback: impl FnOnce(&StreamedAgentResponse) + Send + 'static) -> Self {
        if self.completed {
            callback(&self.snapshot());
        } else {
            self.then_callbacks.push(Box::new(callback));
        }
        self
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Full text, once drained.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Usage from the stream end event, once drained.
    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// Events pulled so far.
    pub fn cached_events(&self) -> &[StreamEvent] {
        &self.events
    }

    /// Encode as `data: <json>` frames terminated by `data: [DONE]`.
    pub fn into_sse(self) -> SseStream {
        sse::encode(self.into_event_stream())
    }

    /// Encode for the UI message stream protocol. Serve with
    /// [`sse::UI_PROTOCOL_HEADER`].
    pub fn into_ui_protocol_sse(self) -> SseStream {
        sse::encode_ui_protocol(self.into_event_stream())
    }

    pub fn into_event_stream(mut self) -> EventStream {
        Box::pin(async_stream::stream! {
            let events = self.events();
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                yield event;
            }
        })
    }

    fn complete(&mut self) {
        self.completed = true;
        self.text = Some(TextDelta::combine(&self.events));
        self.usage = StreamEnd::combine_usage(&self.events);

        let callbacks = std::mem::take(&mut self.then_callbacks);
        if !callbacks.is_empty() {
            let snapshot = self.snapshot();
            for callback in callbacks {
                callback(&snapshot);
            }
        }
    }

    fn snapshot(&self) -> StreamedAgentResponse {
        StreamedAgentResponse::from_events(self.invocation_id.clone(), self.events.clone(), self.meta.clone())
    }
}

impl std::fmt::Debug for StreamableAgentResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableAgentResponse")
            .field("invocation_id", &self.invocation_id)
            .field("meta", &self.meta)
            .field("events", &self.events.len())
            .field("completed", &self.completed)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub meta: Meta,
}

impl EmbeddingsResponse {
    pub fn first(&self) -> Option<&[f32]> {
        self.embeddings.first().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.embeddings.iter().map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub images: Vec<GeneratedImage>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub meta: Meta,
}

impl ImageResponse {
    pub fn first(&self) -> Option<&GeneratedImage> {
        self.images.first()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Generated speech, base64 encoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioResponse {
    pub audio: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub meta: Meta,
}

impl std::fmt::Display for AudioResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.audio)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<TranscriptionSegment>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub meta: Meta,
}

impl std::fmt::Display for TranscriptionResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RerankingResponse {
    /// Most relevant first.
    pub results: Vec<RankedDocument>,
    #[serde(default)]
    pub meta: Meta,
}

impl RerankingResponse {
    pub fn first(&self) -> Option<&RankedDocument> {
        self.results.first()
    }

    pub fn documents(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.document.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FileResponse {
    /// Content decoded as UTF-8, lossily.
    pub fn text(&self) -> Option<String> {
        self.content
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFileResponse {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub file_counts: StoreFileCounts,
    #[serde(default)]
    pub ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::text_to_events;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn counted_source(counter: Arc<AtomicUsize>) -> EventStream {
        let events = text_to_events("inv", "fake", "fake-model", "one two three", Usage::new(1, 3));
        Box::pin(async_stream::stream! {
            counter.fetch_add(1, Ordering::SeqCst);
            for event in events {
                yield Ok::<_, crate::error::AiError>(event);
            }
        })
    }

    #[tokio::test]
    async fn second_iteration_replays_without_pulling_again() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let mut response =
            StreamableAgentResponse::new("inv", Meta::new("fake", "fake-model"), counted_source(pulls.clone()));

        let first = response.collect().await.unwrap();
        let second = response.collect().await.unwrap();

        assert_eq!(first.events, second.events);
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
        assert_eq!(response.text(), Some("one two three"));
        assert_eq!(response.usage(), Some(&Usage::new(1, 3)));
    }

    #[tokio::test]
    async fn abandoned_iteration_resumes() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let mut response =
            StreamableAgentResponse::new("inv", Meta::default(), counted_source(pulls.clone()));

        let mut seen = 0;
        response
            .each(|_| {
                seen += 1;
                seen < 2
            })
            .await
            .unwrap();
        assert!(!response.is_completed());
        assert!(response.text().is_none());

        let all = response.collect().await.unwrap();
        assert_eq!(all.events.len(), 7);
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn then_runs_after_completion() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let mut response = StreamableAgentResponse::new(
            "inv",
            Meta::default(),
            counted_source(Arc::new(AtomicUsize::new(0))),
        )
        .then(move |streamed| *sink.lock().unwrap() = Some(streamed.text.clone()));

        assert!(seen.lock().unwrap().is_none());
        response.collect().await.unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("one two three"));
    }

    #[tokio::test]
    async fn sse_ends_with_done() {
        let response = StreamableAgentResponse::new(
            "inv",
            Meta::default(),
            counted_source(Arc::new(AtomicUsize::new(0))),
        );
        let frames: Vec<String> = response.into_sse().map(|f| f.unwrap()).collect().await;
        assert_eq!(frames.len(), 8);
        assert_eq!(frames.last().map(String::as_str), Some(sse::DONE_FRAME));
    }

    #[test]
    fn structured_indexing() {
        let response = AgentResponse::new("inv", r#"{"score": 7}"#, Usage::default(), Meta::default())
            .into_structured()
            .unwrap();
        assert_eq!(response["score"], 7);
        assert_eq!(response["missing"], Value::Null);
        assert_eq!(response.invocation_id, "inv");
    }

    #[test]
    fn non_object_text_is_not_structured() {
        let err = AgentResponse::new("inv", "plain", Usage::default(), Meta::default())
            .into_structured()
            .unwrap_err();
        assert!(err.to_string().contains("Serialization error"));
    }
}
