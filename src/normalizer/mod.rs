//! Translation of vendor stream chunks into normalized [`StreamEvent`]s.
//!
//! Each vendor declares a table mapping its chunk kinds to handlers. A chunk
//! kind with no entry is skipped, never an error. Handlers work against a
//! shared [`NormalizerState`] which owns the bookkeeping that keeps the
//! normalized sequence well formed even when the vendor omits start or stop
//! markers: exactly one stream start, exactly one stream end, and properly
//! bracketed text and reasoning runs.

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicNormalizer;
pub use gemini::GeminiNormalizer;
pub use openai::OpenAiNormalizer;

use crate::data::{Citation, FinishReason, ToolCall, Usage};
use crate::error::Result;
use crate::streaming::{EventStream, StreamEvent, new_id};
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Reserved key some vendors wrap tool arguments in.
pub const SCHEMA_ENVELOPE_KEY: &str = "schema_definition";

/// Handler for one vendor chunk kind.
pub type ChunkHandler = fn(&mut NormalizerState, &Value) -> Vec<StreamEvent>;

/// Per-vendor chunk translation.
pub trait StreamNormalizer: Send {
    /// Vendor name used in logs.
    fn vendor(&self) -> &'static str;

    /// The chunk-kind dispatch table.
    fn handlers(&self) -> &'static [(&'static str, ChunkHandler)];

    /// Classify a raw chunk. Defaults to its `type` field.
    fn chunk_kind<'a>(&self, chunk: &'a Value) -> Option<&'a str> {
        chunk.get("type").and_then(Value::as_str)
    }

    fn state(&mut self) -> &mut NormalizerState;

    /// Translate one raw chunk into zero or more events.
    fn normalize(&mut self, chunk: &Value) -> Vec<StreamEvent> {
        let vendor = self.vendor();
        let Some(kind) = self.chunk_kind(chunk) else {
            tracing::trace!(vendor, "Skipping unclassifiable stream chunk");
            return Vec::new();
        };
        match self.handlers().iter().find(|(k, _)| *k == kind) {
            Some((_, handler)) => {
                let events = handler(self.state(), chunk);
                self.state().stamp(events)
            }
            None => {
                tracing::trace!(vendor, kind, "Skipping unrecognized stream chunk");
                Vec::new()
            }
        }
    }

    /// Close the current round of a tool loop without ending the stream.
    fn end_round(&mut self) -> Vec<StreamEvent> {
        let state = self.state();
        let mut events = Vec::new();
        state.complete_round(&mut events);
        state.begin_round();
        state.stamp(events)
    }

    /// Close whatever the vendor left open and emit the stream end.
    fn finish(&mut self) -> Vec<StreamEvent> {
        let state = self.state();
        let events = state.finish();
        state.stamp(events)
    }
}

/// Adapt a lazy stream of raw vendor chunks into a lazy normalized event
/// stream. Nothing is buffered beyond the events produced by one chunk.
pub fn normalize_stream<N, S>(mut normalizer: N, chunks: S) -> EventStream
where
    N: StreamNormalizer + 'static,
    S: Stream<Item = Result<Value>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut chunks = Box::pin(chunks);
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in normalizer.normalize(&chunk) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        for event in normalizer.finish() {
            yield Ok(event);
        }
    })
}

/// Strip the schema envelope from tool arguments.
///
/// Objects wrapped as `{"schema_definition": {...}}` yield the inner object;
/// plain objects pass through; JSON-encoded strings are decoded first.
/// Anything else yields an empty map.
pub fn unwrap_tool_arguments(arguments: &Value) -> Map<String, Value> {
    match arguments {
        Value::Object(map) => match map.get(SCHEMA_ENVELOPE_KEY) {
            Some(Value::Object(inner)) => inner.clone(),
            Some(_) => Map::new(),
            None => map.clone(),
        },
        Value::String(raw) if !raw.trim().is_empty() => serde_json::from_str::<Value>(raw)
            .map(|value| unwrap_tool_arguments(&value))
            .unwrap_or_default(),
        _ => Map::new(),
    }
}

/// A tool call whose arguments are still arriving.
#[derive(Debug, Clone, Default)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Bookkeeping shared by every vendor normalizer.
#[derive(Debug)]
pub struct NormalizerState {
    invocation_id: String,
    provider: String,
    model: String,
    started: bool,
    ended: bool,
    text_open: Option<String>,
    reasoning_open: Option<String>,
    usage: Usage,
    round_usage: Usage,
    finish_reason: Option<FinishReason>,
    round_has_tool_calls: bool,
    /// Vendor block index or item id → pending tool call.
    pub pending_tools: HashMap<String, PendingToolCall>,
    /// Vendor block index → block kind, for vendors that close blocks by
    /// index only.
    pub blocks: HashMap<String, String>,
}

impl NormalizerState {
    pub fn new(
        invocation_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            provider: provider.into(),
            model: model.into(),
            started: false,
            ended: false,
            text_open: None,
            reasoning_open: None,
            usage: Usage::default(),
            round_usage: Usage::default(),
            finish_reason: None,
            round_has_tool_calls: false,
            pending_tools: HashMap::new(),
            blocks: HashMap::new(),
        }
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Usage accumulated so far, including the current round.
    pub fn usage(&self) -> Usage {
        self.usage + self.round_usage
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    fn stamp(&self, events: Vec<StreamEvent>) -> Vec<StreamEvent> {
        events
            .into_iter()
            .map(|event| event.with_invocation_id(self.invocation_id.as_str()))
            .collect()
    }

    /// Emit the stream start if it has not been emitted yet.
    pub fn ensure_started(&mut self, events: &mut Vec<StreamEvent>) {
        if !self.started {
            self.started = true;
            events.push(StreamEvent::stream_start(&self.provider, &self.model));
        }
    }

    pub fn close_text(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(id) = self.text_open.take() {
            events.push(StreamEvent::text_end(id));
        }
    }

    pub fn close_reasoning(
        &mut self,
        events: &mut Vec<StreamEvent>,
        summary: Option<Map<String, Value>>,
    ) {
        if let Some(id) = self.reasoning_open.take() {
            events.push(StreamEvent::reasoning_end(id, summary));
        }
    }

    /// Open a text run, closing any other run first.
    pub fn open_text(&mut self, events: &mut Vec<StreamEvent>, message_id: Option<&str>) {
        self.ensure_started(events);
        self.close_reasoning(events, None);
        let switching = matches!(
            (&self.text_open, message_id),
            (Some(open), Some(wanted)) if open != wanted
        );
        if switching {
            self.close_text(events);
        }
        if self.text_open.is_none() {
            let id = message_id.map(str::to_string).unwrap_or_else(new_id);
            events.push(StreamEvent::text_start(&id));
            self.text_open = Some(id);
        }
    }

    pub fn text_delta(
        &mut self,
        events: &mut Vec<StreamEvent>,
        message_id: Option<&str>,
        delta: &str,
    ) {
        self.open_text(events, message_id);
        if let Some(id) = &self.text_open {
            events.push(StreamEvent::text_delta(id, delta));
        }
    }

    /// Open a reasoning run, closing any other run first.
    pub fn open_reasoning(&mut self, events: &mut Vec<StreamEvent>, reasoning_id: Option<&str>) {
        self.ensure_started(events);
        self.close_text(events);
        let switching = matches!(
            (&self.reasoning_open, reasoning_id),
            (Some(open), Some(wanted)) if open != wanted
        );
        if switching {
            self.close_reasoning(events, None);
        }
        if self.reasoning_open.is_none() {
            let id = reasoning_id.map(str::to_string).unwrap_or_else(new_id);
            events.push(StreamEvent::reasoning_start(&id));
            self.reasoning_open = Some(id);
        }
    }

    pub fn reasoning_delta(
        &mut self,
        events: &mut Vec<StreamEvent>,
        reasoning_id: Option<&str>,
        delta: &str,
    ) {
        self.open_reasoning(events, reasoning_id);
        if let Some(id) = &self.reasoning_open {
            events.push(StreamEvent::reasoning_delta(id, delta));
        }
    }

    pub fn is_text_open(&self) -> bool {
        self.text_open.is_some()
    }

    pub fn is_reasoning_open(&self) -> bool {
        self.reasoning_open.is_some()
    }

    /// Emit a completed tool call with unwrapped arguments.
    pub fn tool_call(
        &mut self,
        events: &mut Vec<StreamEvent>,
        id: &str,
        name: &str,
        arguments: &Value,
    ) {
        self.ensure_started(events);
        self.close_text(events);
        self.close_reasoning(events, None);
        self.round_has_tool_calls = true;
        let id = if id.is_empty() { new_id() } else { id.to_string() };
        events.push(StreamEvent::tool_call(ToolCall::new(
            id,
            name,
            unwrap_tool_arguments(arguments),
        )));
    }

    /// Emit a pending tool call once its arguments are complete.
    pub fn flush_tool(&mut self, events: &mut Vec<StreamEvent>, key: &str) -> bool {
        match self.pending_tools.remove(key) {
            Some(pending) => {
                let arguments = Value::String(pending.arguments);
                self.tool_call(events, &pending.id, &pending.name, &arguments);
                true
            }
            None => false,
        }
    }

    pub fn citation(&mut self, events: &mut Vec<StreamEvent>, url: &str, title: Option<&str>) {
        self.ensure_started(events);
        let message_id = self.text_open.clone().unwrap_or_default();
        events.push(StreamEvent::citation(
            message_id,
            Citation {
                url: url.to_string(),
                title: title.map(str::to_string),
            },
        ));
    }

    pub fn error(
        &mut self,
        events: &mut Vec<StreamEvent>,
        error_type: &str,
        message: &str,
        recoverable: bool,
    ) {
        self.ensure_started(events);
        events.push(StreamEvent::error(error_type, message, recoverable));
        self.finish_reason = Some(FinishReason::Error);
    }

    /// Replace the current round's usage with vendor-reported totals.
    pub fn set_round_usage(&mut self, usage: Usage) {
        self.round_usage = usage;
    }

    pub fn round_usage_mut(&mut self) -> &mut Usage {
        &mut self.round_usage
    }

    pub fn set_finish_reason(&mut self, reason: FinishReason) {
        self.finish_reason = Some(reason);
    }

    /// Fold the current round into the totals. The stream end itself is only
    /// emitted by [`finish`](Self::finish), so several rounds of a tool loop
    /// still share one stream end.
    pub fn complete_round(&mut self, events: &mut Vec<StreamEvent>) {
        self.close_text(events);
        self.close_reasoning(events, None);
        self.usage += std::mem::take(&mut self.round_usage);
        if self.finish_reason.is_none() {
            self.finish_reason = Some(if self.round_has_tool_calls {
                FinishReason::ToolCalls
            } else {
                FinishReason::Stop
            });
        }
    }

    /// Prepare for another round against the same invocation.
    pub fn begin_round(&mut self) {
        self.round_has_tool_calls = false;
        self.finish_reason = None;
        self.pending_tools.clear();
        self.blocks.clear();
    }

    /// Close open runs and emit the single stream end.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.ended {
            return events;
        }
        self.ensure_started(&mut events);
        let keys: Vec<String> = self.pending_tools.keys().cloned().collect();
        for key in keys {
            self.flush_tool(&mut events, &key);
        }
        self.complete_round(&mut events);
        self.ended = true;
        events.push(StreamEvent::stream_end(
            self.finish_reason.unwrap_or_default(),
            self.usage,
        ));
        events
    }
}

/// Read an unsigned counter from a JSON object, defaulting to zero.
pub(crate) fn count(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{StreamEventKind, validate_sequence};
    use serde_json::json;

    #[test]
    fn schema_envelope_is_stripped() {
        let args = json!({ "schema_definition": { "min": 1, "max": 1000 } });
        let unwrapped = unwrap_tool_arguments(&args);
        assert_eq!(Value::Object(unwrapped), json!({ "min": 1, "max": 1000 }));
    }

    #[test]
    fn plain_and_encoded_arguments_pass_through() {
        assert_eq!(
            Value::Object(unwrap_tool_arguments(&json!({ "city": "Paris" }))),
            json!({ "city": "Paris" })
        );
        assert_eq!(
            Value::Object(unwrap_tool_arguments(&json!(
                "{\"schema_definition\":{\"q\":\"rust\"}}"
            ))),
            json!({ "q": "rust" })
        );
        assert!(unwrap_tool_arguments(&json!("")).is_empty());
        assert!(unwrap_tool_arguments(&Value::Null).is_empty());
    }

    #[test]
    fn finish_synthesizes_a_well_formed_sequence() {
        let mut state = NormalizerState::new("inv", "p", "m");
        let mut events = Vec::new();
        state.text_delta(&mut events, None, "partial");
        events.extend(state.finish());

        validate_sequence(&events).unwrap();
        assert!(state.finish().is_empty());
    }

    #[test]
    fn empty_stream_still_starts_and_ends() {
        let mut state = NormalizerState::new("inv", "p", "m");
        let events = state.finish();
        assert_eq!(events.len(), 2);
        validate_sequence(&events).unwrap();
    }

    #[test]
    fn rounds_share_one_stream_end_and_sum_usage() {
        let mut state = NormalizerState::new("inv", "p", "m");
        let mut events = Vec::new();
        state.text_delta(&mut events, None, "a");
        state.set_round_usage(Usage::new(1, 2));
        state.complete_round(&mut events);
        state.begin_round();
        state.text_delta(&mut events, None, "b");
        state.set_round_usage(Usage::new(3, 4));
        events.extend(state.finish());

        validate_sequence(&events).unwrap();
        match &events.last().unwrap().kind {
            StreamEventKind::StreamEnd(end) => assert_eq!(end.usage, Usage::new(4, 6)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
