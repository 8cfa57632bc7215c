//! Normalized streaming events.
//!
//! Every vendor stream is translated into the closed set of event kinds in
//! [`StreamEventKind`]. Each [`StreamEvent`] carries an event id, the
//! invocation id of the request it belongs to, and a unix timestamp.
//!
//! Within one invocation there is exactly one [`StreamStart`] and exactly one
//! [`StreamEnd`], and Start/Delta/End runs of one message id never interleave
//! with another id on the same channel. [`validate_sequence`] checks these
//! rules.

pub mod sse;

use crate::data::{Citation as CitationData, FinishReason, ToolCall, ToolResult, Usage};
use crate::error::Result;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::pin::Pin;

/// A lazy, pull-based sequence of normalized events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Generate a time-ordered event or invocation id.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// One normalized streaming event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub id: String,
    #[serde(default)]
    pub invocation_id: Option<String>,
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: StreamEventKind,
}

/// The closed set of normalized event kinds. The serde tag doubles as the
/// wire `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventKind {
    StreamStart(StreamStart),
    StreamEnd(StreamEnd),
    TextStart(TextStart),
    TextDelta(TextDelta),
    TextEnd(TextEnd),
    #[serde(rename = "tool_call")]
    ToolCallStart(ToolCallStart),
    #[serde(rename = "tool_result")]
    ToolCallResult(ToolCallResult),
    ReasoningStart(ReasoningStart),
    ReasoningDelta(ReasoningDelta),
    ReasoningEnd(ReasoningEnd),
    Citation(Citation),
    Error(StreamError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStart {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEnd {
    pub reason: FinishReason,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextStart {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDelta {
    pub message_id: String,
    pub delta: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEnd {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallStart {
    pub tool_call: ToolCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub tool_result: ToolResult,
    pub successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStart {
    pub reasoning_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningDelta {
    pub reasoning_id: String,
    pub delta: String,
}

/// End of a reasoning run. `summary` is `None` when the vendor provided no
/// summary, which is distinct from an empty summary object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningEnd {
    pub reasoning_id: String,
    pub summary: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub message_id: String,
    pub citation: CitationData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    pub error_type: String,
    pub message: String,
    pub recoverable: bool,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl StreamEvent {
    /// Wrap a kind with a fresh id and the current timestamp.
    pub fn new(kind: StreamEventKind) -> Self {
        Self {
            id: new_id(),
            invocation_id: None,
            timestamp: now_timestamp(),
            kind,
        }
    }

    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = Some(invocation_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn stream_start(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(StreamEventKind::StreamStart(StreamStart {
            provider: provider.into(),
            model: model.into(),
            metadata: None,
        }))
    }

    pub fn stream_end(reason: FinishReason, usage: Usage) -> Self {
        Self::new(StreamEventKind::StreamEnd(StreamEnd { reason, usage }))
    }

    pub fn text_start(message_id: impl Into<String>) -> Self {
        Self::new(StreamEventKind::TextStart(TextStart {
            message_id: message_id.into(),
        }))
    }

    pub fn text_delta(message_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::new(StreamEventKind::TextDelta(TextDelta {
            message_id: message_id.into(),
            delta: delta.into(),
        }))
    }

    pub fn text_end(message_id: impl Into<String>) -> Self {
        Self::new(StreamEventKind::TextEnd(TextEnd {
            message_id: message_id.into(),
        }))
    }

    pub fn tool_call(tool_call: ToolCall) -> Self {
        Self::new(StreamEventKind::ToolCallStart(ToolCallStart { tool_call }))
    }

    pub fn tool_result(tool_result: ToolResult, successful: bool, error: Option<String>) -> Self {
        Self::new(StreamEventKind::ToolCallResult(ToolCallResult {
            tool_result,
            successful,
            error,
        }))
    }

    pub fn reasoning_start(reasoning_id: impl Into<String>) -> Self {
        Self::new(StreamEventKind::ReasoningStart(ReasoningStart {
            reasoning_id: reasoning_id.into(),
            provider_metadata: None,
        }))
    }

    pub fn reasoning_delta(reasoning_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::new(StreamEventKind::ReasoningDelta(ReasoningDelta {
            reasoning_id: reasoning_id.into(),
            delta: delta.into(),
        }))
    }

    pub fn reasoning_end(
        reasoning_id: impl Into<String>,
        summary: Option<Map<String, Value>>,
    ) -> Self {
        Self::new(StreamEventKind::ReasoningEnd(ReasoningEnd {
            reasoning_id: reasoning_id.into(),
            summary,
        }))
    }

    pub fn citation(message_id: impl Into<String>, citation: CitationData) -> Self {
        Self::new(StreamEventKind::Citation(Citation {
            message_id: message_id.into(),
            citation,
        }))
    }

    pub fn error(
        error_type: impl Into<String>,
        message: impl Into<String>,
        recoverable: bool,
    ) -> Self {
        Self::new(StreamEventKind::Error(StreamError {
            error_type: error_type.into(),
            message: message.into(),
            recoverable,
            metadata: None,
        }))
    }

    /// The wire `type` tag of this event.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            StreamEventKind::StreamStart(_) => "stream_start",
            StreamEventKind::StreamEnd(_) => "stream_end",
            StreamEventKind::TextStart(_) => "text_start",
            StreamEventKind::TextDelta(_) => "text_delta",
            StreamEventKind::TextEnd(_) => "text_end",
            StreamEventKind::ToolCallStart(_) => "tool_call",
            StreamEventKind::ToolCallResult(_) => "tool_result",
            StreamEventKind::ReasoningStart(_) => "reasoning_start",
            StreamEventKind::ReasoningDelta(_) => "reasoning_delta",
            StreamEventKind::ReasoningEnd(_) => "reasoning_end",
            StreamEventKind::Citation(_) => "citation",
            StreamEventKind::Error(_) => "error",
        }
    }

    pub fn is_stream_start(&self) -> bool {
        matches!(self.kind, StreamEventKind::StreamStart(_))
    }

    pub fn is_stream_end(&self) -> bool {
        matches!(self.kind, StreamEventKind::StreamEnd(_))
    }

    /// Wire encoding: one JSON object tagged with `type`.
    pub fn to_wire(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Encoding for the Vercel AI SDK UI message stream protocol.
    ///
    /// Returns `None` for events with no equivalent in that protocol; the
    /// transport skips them.
    pub fn to_ui_protocol(&self) -> Option<Value> {
        let value = match &self.kind {
            StreamEventKind::StreamStart(_) => json!({
                "type": "start",
                "messageId": self.invocation_id.as_deref().unwrap_or(&self.id),
            }),
            StreamEventKind::StreamEnd(_) => json!({ "type": "finish" }),
            StreamEventKind::TextStart(e) => json!({ "type": "text-start", "id": e.message_id }),
            StreamEventKind::TextDelta(e) => {
                if e.delta.is_empty() {
                    return None;
                }
                json!({ "type": "text-delta", "id": e.message_id, "delta": e.delta })
            }
            StreamEventKind::TextEnd(e) => json!({ "type": "text-end", "id": e.message_id }),
            StreamEventKind::ToolCallStart(e) => json!({
                "type": "tool-input-available",
                "toolCallId": e.tool_call.id,
                "toolName": e.tool_call.name,
                "input": e.tool_call.arguments,
            }),
            StreamEventKind::ToolCallResult(e) => {
                if !e.successful {
                    json!({
                        "type": "tool-output-error",
                        "toolCallId": e.tool_result.id,
                        "errorText": e.error.clone().unwrap_or_default(),
                    })
                } else {
                    json!({
                        "type": "tool-output-available",
                        "toolCallId": e.tool_result.id,
                        "output": e.tool_result.result,
                    })
                }
            }
            StreamEventKind::ReasoningStart(e) => {
                json!({ "type": "reasoning-start", "id": e.reasoning_id })
            }
            StreamEventKind::ReasoningDelta(e) => {
                if e.delta.is_empty() {
                    return None;
                }
                json!({ "type": "reasoning-delta", "id": e.reasoning_id, "delta": e.delta })
            }
            StreamEventKind::ReasoningEnd(e) => {
                json!({ "type": "reasoning-end", "id": e.reasoning_id })
            }
            StreamEventKind::Citation(e) => {
                let mut value = json!({
                    "type": "source-url",
                    "sourceId": e.citation.url,
                    "url": e.citation.url,
                });
                if let Some(title) = &e.citation.title {
                    value["title"] = json!(title);
                }
                value
            }
            StreamEventKind::Error(e) => json!({ "type": "error", "errorText": e.message }),
        };
        Some(value)
    }
}

impl std::fmt::Display for StreamEvent {
    /// Renders the event as a single SSE `data:` frame.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&sse::frame(&self.to_wire()))
    }
}

impl TextDelta {
    /// Concatenate every text delta in `events`, in order, ignoring all other
    /// kinds.
    ///
    /// Combining a prefix and the remaining suffix separately and joining the
    /// results equals combining the whole slice.
    pub fn combine(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|event| match &event.kind {
                StreamEventKind::TextDelta(delta) => Some(delta.delta.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl StreamEnd {
    /// The usage reported by the stream's end event, or `None` when the
    /// stream was truncated before one arrived.
    pub fn combine_usage(events: &[StreamEvent]) -> Option<Usage> {
        events.iter().rev().find_map(|event| match &event.kind {
            StreamEventKind::StreamEnd(end) => Some(end.usage),
            _ => None,
        })
    }

    /// The finish reason reported by the stream's end event.
    pub fn finish_reason(events: &[StreamEvent]) -> Option<FinishReason> {
        events.iter().rev().find_map(|event| match &event.kind {
            StreamEventKind::StreamEnd(end) => Some(end.reason),
            _ => None,
        })
    }
}

/// A broken ordering rule found by [`validate_sequence`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceViolation {
    #[error("expected exactly one stream_start, found {0}")]
    StreamStartCount(usize),
    #[error("expected exactly one stream_end, found {0}")]
    StreamEndCount(usize),
    #[error("stream_end must be the last event")]
    StreamEndNotLast,
    #[error("{channel} run '{opened}' is still open when '{attempted}' starts")]
    Interleaved {
        channel: &'static str,
        opened: String,
        attempted: String,
    },
    #[error("{channel} event for '{id}' outside of its start/end run")]
    OutsideRun { channel: &'static str, id: String },
    #[error("{channel} run '{id}' was never closed")]
    Unclosed { channel: &'static str, id: String },
}

#[derive(Default)]
struct Channel {
    name: &'static str,
    open: Option<String>,
}

impl Channel {
    fn start(&mut self, id: &str) -> std::result::Result<(), SequenceViolation> {
        if let Some(opened) = &self.open {
            return Err(SequenceViolation::Interleaved {
                channel: self.name,
                opened: opened.clone(),
                attempted: id.to_string(),
            });
        }
        self.open = Some(id.to_string());
        Ok(())
    }

    fn within(&self, id: &str) -> std::result::Result<(), SequenceViolation> {
        match &self.open {
            Some(open) if open == id => Ok(()),
            _ => Err(SequenceViolation::OutsideRun {
                channel: self.name,
                id: id.to_string(),
            }),
        }
    }

    fn end(&mut self, id: &str) -> std::result::Result<(), SequenceViolation> {
        self.within(id)?;
        self.open = None;
        Ok(())
    }
}

/// Check the per-invocation ordering rules of a fully materialized event
/// list.
pub fn validate_sequence(events: &[StreamEvent]) -> std::result::Result<(), SequenceViolation> {
    let starts = events.iter().filter(|e| e.is_stream_start()).count();
    if starts != 1 {
        return Err(SequenceViolation::StreamStartCount(starts));
    }
    let ends = events.iter().filter(|e| e.is_stream_end()).count();
    if ends != 1 {
        return Err(SequenceViolation::StreamEndCount(ends));
    }
    if !events.last().is_some_and(StreamEvent::is_stream_end) {
        return Err(SequenceViolation::StreamEndNotLast);
    }

    let mut text = Channel {
        name: "text",
        open: None,
    };
    let mut reasoning = Channel {
        name: "reasoning",
        open: None,
    };

    for event in events {
        match &event.kind {
            StreamEventKind::TextStart(e) => text.start(&e.message_id)?,
            StreamEventKind::TextDelta(e) => text.within(&e.message_id)?,
            StreamEventKind::TextEnd(e) => text.end(&e.message_id)?,
            StreamEventKind::ReasoningStart(e) => reasoning.start(&e.reasoning_id)?,
            StreamEventKind::ReasoningDelta(e) => reasoning.within(&e.reasoning_id)?,
            StreamEventKind::ReasoningEnd(e) => reasoning.end(&e.reasoning_id)?,
            _ => {}
        }
    }

    for channel in [text, reasoning] {
        if let Some(id) = channel.open {
            return Err(SequenceViolation::Unclosed {
                channel: channel.name,
                id,
            });
        }
    }
    Ok(())
}

/// Expand plain text into the canonical event sequence: stream start, text
/// start, one delta per word, text end, stream end.
///
/// Words after the first carry a leading space so the deltas recombine into
/// the original text.
pub fn text_to_events(
    invocation_id: &str,
    provider: &str,
    model: &str,
    text: &str,
    usage: Usage,
) -> Vec<StreamEvent> {
    let message_id = new_id();
    let mut events = vec![
        StreamEvent::stream_start(provider, model),
        StreamEvent::text_start(&message_id),
    ];
    for (i, word) in text.split(' ').enumerate() {
        let delta = if i == 0 {
            word.to_string()
        } else {
            format!(" {}", word)
        };
        events.push(StreamEvent::text_delta(&message_id, delta));
    }
    events.push(StreamEvent::text_end(&message_id));
    events.push(StreamEvent::stream_end(FinishReason::Stop, usage));

    events
        .into_iter()
        .map(|event| event.with_invocation_id(invocation_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<StreamEvent> {
        text_to_events("inv-1", "openai", "gpt-5-mini", "Hello there world", Usage::new(3, 4))
    }

    #[test]
    fn text_expansion_produces_canonical_sequence() {
        let events = sample();
        assert_eq!(events.len(), 7);
        assert!(events[0].is_stream_start());
        assert!(events[6].is_stream_end());
        assert_eq!(TextDelta::combine(&events), "Hello there world");
        assert!(events.iter().all(|e| e.invocation_id.as_deref() == Some("inv-1")));
        validate_sequence(&events).unwrap();
    }

    #[test]
    fn combine_is_split_invariant() {
        let events = sample();
        let whole = TextDelta::combine(&events);
        for split in 0..=events.len() {
            let (left, right) = events.split_at(split);
            assert_eq!(
                format!("{}{}", TextDelta::combine(left), TextDelta::combine(right)),
                whole
            );
        }
    }

    #[test]
    fn combine_usage_requires_stream_end() {
        let events = sample();
        assert_eq!(StreamEnd::combine_usage(&events), Some(Usage::new(3, 4)));
        assert_eq!(StreamEnd::combine_usage(&events[..events.len() - 1]), None);
    }

    #[test]
    fn wire_encoding_is_tagged() {
        let event = StreamEvent::text_delta("msg-1", "Hi").with_invocation_id("inv");
        let wire = event.to_wire();
        assert_eq!(wire["type"], "text_delta");
        assert_eq!(wire["delta"], "Hi");
        assert_eq!(wire["invocation_id"], "inv");
        assert_eq!(wire["id"], event.id.as_str());

        let back: StreamEvent = serde_json::from_value(wire).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn reasoning_end_keeps_absent_summary_null() {
        let wire = StreamEvent::reasoning_end("r-1", None).to_wire();
        assert!(wire["summary"].is_null());

        let wire = StreamEvent::reasoning_end("r-1", Some(Map::new())).to_wire();
        assert!(wire["summary"].is_object());
    }

    #[test]
    fn ui_protocol_skips_empty_deltas() {
        assert!(StreamEvent::text_delta("m", "").to_ui_protocol().is_none());
        let value = StreamEvent::text_delta("m", "x").to_ui_protocol().unwrap();
        assert_eq!(value["type"], "text-delta");
    }

    #[test]
    fn validation_rejects_interleaved_text_runs() {
        let events = vec![
            StreamEvent::stream_start("p", "m"),
            StreamEvent::text_start("a"),
            StreamEvent::text_start("b"),
            StreamEvent::text_end("b"),
            StreamEvent::text_end("a"),
            StreamEvent::stream_end(FinishReason::Stop, Usage::default()),
        ];
        assert!(matches!(
            validate_sequence(&events),
            Err(SequenceViolation::Interleaved { channel: "text", .. })
        ));
    }

    #[test]
    fn validation_allows_reasoning_then_answer() {
        let events = vec![
            StreamEvent::stream_start("p", "m"),
            StreamEvent::reasoning_start("r"),
            StreamEvent::reasoning_delta("r", "thinking"),
            StreamEvent::reasoning_end("r", None),
            StreamEvent::text_start("a"),
            StreamEvent::text_delta("a", "answer"),
            StreamEvent::text_end("a"),
            StreamEvent::stream_end(FinishReason::Stop, Usage::default()),
        ];
        validate_sequence(&events).unwrap();
    }

    #[test]
    fn validation_rejects_missing_end() {
        let mut events = sample();
        events.pop();
        assert_eq!(
            validate_sequence(&events),
            Err(SequenceViolation::StreamEndCount(0))
        );
    }
}
