//! OpenAI Responses API stream (`response.*` events).

use super::{ChunkHandler, NormalizerState, PendingToolCall, StreamNormalizer, count};
use crate::data::{FinishReason, Usage};
use crate::streaming::StreamEvent;
use serde_json::{Map, Value, json};

pub struct OpenAiNormalizer {
    state: NormalizerState,
}

impl OpenAiNormalizer {
    pub fn new(state: NormalizerState) -> Self {
        Self { state }
    }
}

const HANDLERS: &[(&str, ChunkHandler)] = &[
    ("response.created", on_created),
    ("response.in_progress", on_created),
    ("response.output_item.added", on_item_added),
    ("response.output_text.delta", on_text_delta),
    ("response.output_text.done", on_text_done),
    ("response.output_text.annotation.added", on_annotation),
    ("response.reasoning_summary_text.delta", on_reasoning_delta),
    ("response.reasoning_text.delta", on_reasoning_delta),
    ("response.function_call_arguments.delta", on_arguments_delta),
    ("response.output_item.done", on_item_done),
    ("response.completed", on_completed),
    ("response.incomplete", on_incomplete),
    ("response.failed", on_failed),
    ("error", on_error),
];

impl StreamNormalizer for OpenAiNormalizer {
    fn vendor(&self) -> &'static str {
        "openai"
    }

    fn handlers(&self) -> &'static [(&'static str, ChunkHandler)] {
        HANDLERS
    }

    fn state(&mut self) -> &mut NormalizerState {
        &mut self.state
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn on_created(state: &mut NormalizerState, _chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    state.ensure_started(&mut events);
    events
}

fn on_item_added(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let item = &chunk["item"];
    match str_field(item, "type") {
        Some("reasoning") => state.open_reasoning(&mut events, str_field(item, "id")),
        Some("function_call") => {
            let key = str_field(item, "id").unwrap_or_default().to_string();
            state.pending_tools.insert(
                key,
                PendingToolCall {
                    id: str_field(item, "call_id").unwrap_or_default().to_string(),
                    name: str_field(item, "name").unwrap_or_default().to_string(),
                    arguments: String::new(),
                },
            );
        }
        _ => state.ensure_started(&mut events),
    }
    events
}

fn on_text_delta(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let delta = str_field(chunk, "delta").unwrap_or_default();
    state.text_delta(&mut events, str_field(chunk, "item_id"), delta);
    events
}

fn on_text_done(state: &mut NormalizerState, _chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    state.close_text(&mut events);
    events
}

fn on_annotation(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let annotation = &chunk["annotation"];
    if str_field(annotation, "type") == Some("url_citation")
        && let Some(url) = str_field(annotation, "url")
    {
        state.citation(&mut events, url, str_field(annotation, "title"));
    }
    events
}

fn on_reasoning_delta(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let delta = str_field(chunk, "delta").unwrap_or_default();
    state.reasoning_delta(&mut events, str_field(chunk, "item_id"), delta);
    events
}

fn on_arguments_delta(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    if let Some(pending) = str_field(chunk, "item_id").and_then(|id| state.pending_tools.get_mut(id))
    {
        pending
            .arguments
            .push_str(str_field(chunk, "delta").unwrap_or_default());
    }
    Vec::new()
}

fn reasoning_summary(item: &Value) -> Option<Map<String, Value>> {
    let parts = item.get("summary")?.as_array()?;
    let text: Vec<&str> = parts.iter().filter_map(|p| str_field(p, "text")).collect();
    if text.is_empty() {
        return None;
    }
    let mut summary = Map::new();
    summary.insert("text".to_string(), json!(text.join("\n")));
    Some(summary)
}

fn on_item_done(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let item = &chunk["item"];
    match str_field(item, "type") {
        Some("function_call") => {
            let key = str_field(item, "id").unwrap_or_default();
            state.pending_tools.remove(key);
            let arguments = item.get("arguments").cloned().unwrap_or(Value::Null);
            state.tool_call(
                &mut events,
                str_field(item, "call_id").unwrap_or_default(),
                str_field(item, "name").unwrap_or_default(),
                &arguments,
            );
        }
        Some("reasoning") => state.close_reasoning(&mut events, reasoning_summary(item)),
        Some("message") => state.close_text(&mut events),
        _ => {}
    }
    events
}

fn usage_from(response: &Value) -> Usage {
    let usage = &response["usage"];
    Usage {
        prompt_tokens: count(usage, "input_tokens"),
        completion_tokens: count(usage, "output_tokens"),
        cache_write_input_tokens: 0,
        cache_read_input_tokens: count(&usage["input_tokens_details"], "cached_tokens"),
        reasoning_tokens: count(&usage["output_tokens_details"], "reasoning_tokens"),
    }
}

fn on_completed(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    state.set_round_usage(usage_from(&chunk["response"]));
    state.complete_round(&mut events);
    events
}

fn on_incomplete(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    state.set_round_usage(usage_from(&chunk["response"]));
    state.set_finish_reason(FinishReason::Length);
    state.complete_round(&mut events);
    events
}

fn on_failed(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let error = &chunk["response"]["error"];
    state.error(
        &mut events,
        str_field(error, "code").unwrap_or("response_failed"),
        str_field(error, "message").unwrap_or("The response failed."),
        false,
    );
    state.complete_round(&mut events);
    events
}

fn on_error(state: &mut NormalizerState, chunk: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    state.error(
        &mut events,
        str_field(chunk, "code").unwrap_or("error"),
        str_field(chunk, "message").unwrap_or_default(),
        false,
    );
    events
}
