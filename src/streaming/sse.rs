//! Server-sent-events framing for normalized streams.
//!
//! Two encodings are supported: the plain one, where every event becomes one
//! `data:` frame carrying its wire JSON, and the Vercel AI SDK UI message
//! stream protocol, which forwards a single start frame and holds the finish
//! frame back until just before the `[DONE]` sentinel.

use super::{EventStream, StreamEvent};
use crate::error::Result;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;

/// Terminating sentinel frame.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Header announcing the UI message stream protocol to clients.
pub const UI_PROTOCOL_HEADER: (&str, &str) = ("x-vercel-ai-ui-message-stream", "v1");

/// A lazy sequence of encoded SSE frames.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Encode one JSON payload as a `data:` frame.
pub fn frame(payload: &Value) -> String {
    format!("data: {}\n\n", payload)
}

/// Plain encoding: one frame per event, then the sentinel.
///
/// A stream error is yielded as-is and ends the output without a sentinel.
pub fn encode(mut events: EventStream) -> SseStream {
    Box::pin(async_stream::stream! {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => yield Ok(frame(&event.to_wire())),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        yield Ok(DONE_FRAME.to_string());
    })
}

/// Tracks the UI-protocol rules across a sequence of events.
#[derive(Debug, Default)]
pub struct UiProtocolEncoder {
    stream_started: bool,
    last_stream_end: Option<Value>,
}

impl UiProtocolEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame for one event, or `None` when the event is suppressed or
    /// deferred.
    pub fn push(&mut self, event: &StreamEvent) -> Option<String> {
        if event.is_stream_start() {
            if self.stream_started {
                return None;
            }
            self.stream_started = true;
        }

        if event.is_stream_end() {
            self.last_stream_end = event.to_ui_protocol();
            return None;
        }

        event.to_ui_protocol().map(|payload| frame(&payload))
    }

    /// The deferred finish frame (if any) followed by the sentinel.
    pub fn finish(&mut self) -> Vec<String> {
        let mut frames = Vec::with_capacity(2);
        if let Some(end) = self.last_stream_end.take() {
            frames.push(frame(&end));
        }
        frames.push(DONE_FRAME.to_string());
        frames
    }

    /// Encode a complete, already materialized event list.
    pub fn encode_all(events: &[StreamEvent]) -> Vec<String> {
        let mut encoder = Self::new();
        let mut frames: Vec<String> = events.iter().filter_map(|e| encoder.push(e)).collect();
        frames.extend(encoder.finish());
        frames
    }
}

/// UI message stream protocol encoding of a lazy event stream.
pub fn encode_ui_protocol(mut events: EventStream) -> SseStream {
    Box::pin(async_stream::stream! {
        let mut encoder = UiProtocolEncoder::new();
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if let Some(frame) = encoder.push(&event) {
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        for frame in encoder.finish() {
            yield Ok(frame);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FinishReason, Usage};
    use crate::streaming::text_to_events;

    #[test]
    fn ui_protocol_sends_one_start_and_defers_finish() {
        let mut events = text_to_events("inv", "p", "m", "Hi there", Usage::default());
        // A second start from a tool-loop round must be dropped.
        events.insert(3, StreamEvent::stream_start("p", "m"));
        events.insert(4, StreamEvent::stream_end(FinishReason::ToolCalls, Usage::default()));

        let frames = UiProtocolEncoder::encode_all(&events);
        let starts = frames.iter().filter(|f| f.contains("\"start\"")).count();
        let finishes = frames.iter().filter(|f| f.contains("\"finish\"")).count();

        assert_eq!(starts, 1);
        assert_eq!(finishes, 1);
        assert_eq!(frames.last().unwrap(), DONE_FRAME);
        assert!(frames[frames.len() - 2].contains("\"finish\""));
    }

    #[tokio::test]
    async fn plain_encoding_ends_with_sentinel() {
        let events = text_to_events("inv", "p", "m", "one two", Usage::default());
        let count = events.len();
        let stream: EventStream = Box::pin(futures::stream::iter(events.into_iter().map(Ok)));

        let frames: Vec<String> = encode(stream)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|f| f.unwrap())
            .collect();

        assert_eq!(frames.len(), count + 1);
        assert!(frames[0].starts_with("data: {"));
        assert!(frames[0].contains("\"type\":\"stream_start\""));
        assert_eq!(frames[count], DONE_FRAME);
    }
}
