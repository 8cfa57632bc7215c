//! Gemini `streamGenerateContent` chunks.
//!
//! Gemini chunks are untyped, so they are classified by shape: an `error`
//! object, a `candidates` array, or a trailing `usageMetadata`-only chunk.

use super::{ChunkHandler, NormalizerState, StreamNormalizer, count};
use crate::data::{FinishReason, Usage};
use crate::streaming::StreamEvent;
use serde_json::Value;

pub struct GeminiNormalizer {
    state: NormalizerState,
}

impl GeminiNormalizer {
    pub fn new(state: NormalizerState) -> Self {
        Self { state }
    }
}

const HANDLERS: &[(&str, ChunkHandler)] = &[
    ("candidates", on_candidates),
    ("usage", on_usage),
    ("error", on_error),
];

impl StreamNormalizer for GeminiNormalizer {
    fn vendor(&self) -> &'static str {
        "gemini"
    }

    fn handlers(&self) -> &'static [(&'static str, ChunkHandler)] {
        HANDLERS
    }

    fn chunk_kind<'a>(&self, chunk: &'a Value) -> Option<&'a str> {
        if chunk.get("error").is_some() {
            Some("error")
        } else if chunk.get("candidates").is_some() {
            Some("candidates")
        } else if chunk.get("usageMetadata").is_some() {
            Some("usage")
        } else {
            None
        }
    }

    fn state(&mut self) -> &mut NormalizerState {
        &mut self.state
    }
}

fn usage_from(metadata: &Value) -> Usage {
    Usage {
        prompt_tokens: count(metadata, "promptTokenCount"),
        completion_tokens: count(metadata, "candidatesTokenCount"),
        cache_write_input_tokens: 0,
        cache_read_input_tokens: count(metadata, "cachedContentTokenCount"),
        reasoning_tokens: count(metadata, "thoughtsTokenCount"),
    }
}

fn on_candidates(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    state.ensure_started(&mut events);

    // Usage metadata is cumulative, so the latest chunk wins.
    if let Some(metadata) = chunk.get("usageMetadata") {
        state.set_round_usage(usage_from(metadata));
    }

    let Some(candidate) = chunk["candidates"].get(0) else {
        return events;
    };

    let parts = candidate["content"]["parts"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default();
    for part in parts {
        if let Some(call) = part.get("functionCall") {
            let arguments = call.get("args").cloned().unwrap_or(Value::Null);
            state.tool_call(
                &mut events,
                call["id"].as_str().unwrap_or_default(),
                call["name"].as_str().unwrap_or_default(),
                &arguments,
            );
        } else if let Some(text) = part.get("text").and_then(Value::as_str) {
            if part["thought"].as_bool().unwrap_or(false) {
                state.reasoning_delta(&mut events, None, text);
            } else {
                state.text_delta(&mut events, None, text);
            }
        }
    }

    if let Some(chunks) = candidate["groundingMetadata"]["groundingChunks"].as_array() {
        for web in chunks.iter().filter_map(|c| c.get("web")) {
            if let Some(uri) = web["uri"].as_str() {
                state.citation(&mut events, uri, web["title"].as_str());
            }
        }
    }

    if let Some(reason) = candidate["finishReason"].as_str() {
        // Gemini reports STOP even after function calls.
        let reason = FinishReason::from_vendor(reason);
        if reason != FinishReason::Stop {
            state.set_finish_reason(reason);
        }
        // The round is folded at `end_round` or `finish`: a usage-only chunk
        // may still follow with the final totals.
        state.close_text(&mut events);
        state.close_reasoning(&mut events, None);
    }
    events
}

fn on_usage(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    // Cumulative, so it replaces whatever the candidates reported.
    state.set_round_usage(usage_from(&chunk["usageMetadata"]));
    Vec::new()
}

fn on_error(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let error = &chunk["error"];
    state.error(
        &mut events,
        error["status"].as_str().unwrap_or("error"),
        error["message"].as_str().unwrap_or_default(),
        error["code"].as_u64() == Some(429),
    );
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{StreamEnd, StreamEventKind, TextDelta, validate_sequence};
    use serde_json::json;

    fn run(chunks: &[Value]) -> Vec<StreamEvent> {
        let mut normalizer =
            GeminiNormalizer::new(NormalizerState::new("inv", "gemini", "gemini-2.5-flash"));
        let mut events: Vec<StreamEvent> =
            chunks.iter().flat_map(|c| normalizer.normalize(c)).collect();
        events.extend(normalizer.finish());
        events
    }

    #[test]
    fn thought_parts_become_reasoning() {
        let events = run(&[
            json!({"candidates": [{"content": {"parts": [{"text": "pondering", "thought": true}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "Forty"}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "-two"}]}, "finishReason": "STOP"}],
                   "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "thoughtsTokenCount": 9}}),
        ]);

        validate_sequence(&events).unwrap();
        assert_eq!(TextDelta::combine(&events), "Forty-two");
        assert!(events.iter().any(|e| matches!(e.kind, StreamEventKind::ReasoningDelta(_))));
        let usage = StreamEnd::combine_usage(&events).unwrap();
        assert_eq!(usage.reasoning_tokens, 9);
        assert_eq!(usage.completion_tokens, 2);
    }

    #[test]
    fn function_calls_get_ids_and_plain_arguments() {
        let events = run(&[json!({"candidates": [{"content": {"parts": [
            {"functionCall": {"name": "random_number", "args": {"schema_definition": {"min": 1, "max": 1000}}}}
        ]}, "finishReason": "STOP"}]})]);

        let call = events
            .iter()
            .find_map(|e| match &e.kind {
                StreamEventKind::ToolCallStart(s) => Some(s.tool_call.clone()),
                _ => None,
            })
            .unwrap();
        assert!(!call.id.is_empty());
        assert_eq!(Value::Object(call.arguments), json!({"min": 1, "max": 1000}));
        assert_eq!(StreamEnd::finish_reason(&events), Some(FinishReason::ToolCalls));
    }

    #[test]
    fn trailing_usage_replaces_the_finished_candidate_usage() {
        let events = run(&[
            json!({"candidates": [{"content": {"parts": [{"text": "Hi"}]}, "finishReason": "STOP"}],
                   "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 1}}),
            json!({"usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 3}}),
        ]);

        validate_sequence(&events).unwrap();
        let usage = StreamEnd::combine_usage(&events).unwrap();
        assert_eq!(usage.prompt_tokens, 4);
        assert_eq!(usage.completion_tokens, 3);
        assert_eq!(StreamEnd::finish_reason(&events), Some(FinishReason::Stop));
    }

    #[test]
    fn trailing_usage_counts_once_per_round() {
        let mut normalizer =
            GeminiNormalizer::new(NormalizerState::new("inv", "gemini", "gemini-2.5-flash"));
        let mut events: Vec<StreamEvent> = Vec::new();
        for round in [2_u64, 5] {
            events.extend(normalizer.normalize(&json!({
                "candidates": [{"content": {"parts": [{"text": "step"}]}, "finishReason": "STOP"}]
            })));
            events.extend(normalizer.normalize(&json!({
                "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": round}
            })));
            if round == 2 {
                events.extend(normalizer.end_round());
            }
        }
        events.extend(normalizer.finish());

        validate_sequence(&events).unwrap();
        let usage = StreamEnd::combine_usage(&events).unwrap();
        assert_eq!(usage.prompt_tokens, 20);
        assert_eq!(usage.completion_tokens, 7);
    }
}
