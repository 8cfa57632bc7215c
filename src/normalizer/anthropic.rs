//! Anthropic Messages API stream (`message_*` / `content_block_*` events).

use super::{ChunkHandler, NormalizerState, PendingToolCall, StreamNormalizer, count};
use crate::data::FinishReason;
use crate::streaming::StreamEvent;
use serde_json::Value;

pub struct AnthropicNormalizer {
    state: NormalizerState,
}

impl AnthropicNormalizer {
    pub fn new(state: NormalizerState) -> Self {
        Self { state }
    }
}

const HANDLERS: &[(&str, ChunkHandler)] = &[
    ("message_start", on_message_start),
    ("content_block_start", on_block_start),
    ("content_block_delta", on_block_delta),
    ("content_block_stop", on_block_stop),
    ("message_delta", on_message_delta),
    ("message_stop", on_message_stop),
    ("ping", on_ping),
    ("error", on_error),
];

impl StreamNormalizer for AnthropicNormalizer {
    fn vendor(&self) -> &'static str {
        "anthropic"
    }

    fn handlers(&self) -> &'static [(&'static str, ChunkHandler)] {
        HANDLERS
    }

    fn state(&mut self) -> &mut NormalizerState {
        &mut self.state
    }
}

fn block_key(chunk: &Value) -> String {
    chunk
        .get("index")
        .and_then(Value::as_u64)
        .unwrap_or_default()
        .to_string()
}

fn on_message_start(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    state.ensure_started(&mut events);
    let usage = &chunk["message"]["usage"];
    let round = state.round_usage_mut();
    round.prompt_tokens = count(usage, "input_tokens");
    round.completion_tokens = count(usage, "output_tokens");
    round.cache_write_input_tokens = count(usage, "cache_creation_input_tokens");
    round.cache_read_input_tokens = count(usage, "cache_read_input_tokens");
    events
}

fn on_block_start(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let key = block_key(chunk);
    let block = &chunk["content_block"];
    let kind = block.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "text" => state.open_text(&mut events, None),
        "thinking" => state.open_reasoning(&mut events, None),
        "tool_use" | "server_tool_use" => {
            state.pending_tools.insert(
                key.clone(),
                PendingToolCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    arguments: String::new(),
                },
            );
        }
        _ => {}
    }
    state.blocks.insert(key, kind.to_string());
    events
}

fn on_block_delta(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let delta = &chunk["delta"];
    match delta.get("type").and_then(Value::as_str) {
        Some("text_delta") => {
            state.text_delta(&mut events, None, delta["text"].as_str().unwrap_or_default())
        }
        Some("thinking_delta") => state.reasoning_delta(
            &mut events,
            None,
            delta["thinking"].as_str().unwrap_or_default(),
        ),
        Some("input_json_delta") => {
            if let Some(pending) = state.pending_tools.get_mut(&block_key(chunk)) {
                pending
                    .arguments
                    .push_str(delta["partial_json"].as_str().unwrap_or_default());
            }
        }
        Some("citations_delta") => {
            let citation = &delta["citation"];
            if let Some(url) = citation["url"].as_str() {
                state.citation(&mut events, url, citation["title"].as_str());
            }
        }
        _ => {}
    }
    events
}

fn on_block_stop(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let key = block_key(chunk);
    if state.flush_tool(&mut events, &key) {
        return events;
    }
    match state.blocks.get(&key).map(String::as_str) {
        Some("text") => state.close_text(&mut events),
        Some("thinking") => state.close_reasoning(&mut events, None),
        _ => {}
    }
    events
}

fn on_message_delta(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    if let Some(reason) = chunk["delta"]["stop_reason"].as_str() {
        state.set_finish_reason(FinishReason::from_vendor(reason));
    }
    if let Some(output) = chunk["usage"]["output_tokens"].as_u64() {
        state.round_usage_mut().completion_tokens = output;
    }
    Vec::new()
}

fn on_message_stop(state: &mut NormalizerState, _chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    state.complete_round(&mut events);
    events
}

fn on_ping(_state: &mut NormalizerState, _chunk: &Value) -> Vec<StreamEvent> {
    Vec::new()
}

fn on_error(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let error = &chunk["error"];
    let error_type = error["type"].as_str().unwrap_or("error");
    state.error(
        &mut events,
        error_type,
        error["message"].as_str().unwrap_or_default(),
        error_type == "overloaded_error",
    );
    events
}
