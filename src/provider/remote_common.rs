//! Shared utilities for all remote (HTTP API) drivers: HTTP status mapping,
//! API key resolution, SSE decoding, attachment loading, and the tool loop
//! every text gateway runs.

use crate::data::{
    Attachment, AttachmentSource, FinishReason, Message, Meta, Step, ToolCall, ToolResult, Usage,
};
use crate::error::{AiError, Result};
use crate::normalizer::StreamNormalizer;
use crate::prompt::TextRequest;
use crate::response::AgentResponse;
use crate::streaming::{EventStream, StreamEvent, StreamEventKind};
use crate::tool::invoke_tool_calls;
use crate::traits::ProviderContext;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

/// Raw vendor chunks of one streamed round.
pub(crate) type ChunkStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Map an HTTP response status to an [`AiError`] for non-success codes.
/// Returns `Ok(response)` when the status is 2xx.
///
/// 429 is the only status that fails over. The message of any other failure
/// is taken from the vendor's `error.message` when the body carries one.
pub(crate) async fn check_http_status(
    provider_name: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == 429 {
        return Err(AiError::rate_limited(provider_name));
    }
    let body = response.text().await.unwrap_or_default();
    Err(AiError::Vendor {
        provider: provider_name.to_string(),
        status: status.as_u16(),
        message: vendor_message(&body),
    })
}

fn vendor_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        value["error"]["message"]
            .as_str()
            .or_else(|| value["message"].as_str())
            .or_else(|| value["error"].as_str())
    });
    match message {
        Some(message) => message.to_string(),
        None if body.trim().is_empty() => "empty response body".to_string(),
        None => body.trim().to_string(),
    }
}

pub(crate) fn transport_error(provider_name: &str, error: reqwest::Error) -> AiError {
    AiError::Transport(format!("{}: {}", provider_name, error))
}

/// Send a request and decode the JSON body of a successful response.
pub(crate) async fn send_json(
    provider_name: &str,
    request: reqwest::RequestBuilder,
) -> Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(provider_name, e))?;
    let response = check_http_status(provider_name, response).await?;
    response
        .json::<Value>()
        .await
        .map_err(|e| transport_error(provider_name, e))
}

/// Send a request and return the raw body bytes of a successful response.
pub(crate) async fn send_bytes(
    provider_name: &str,
    request: reqwest::RequestBuilder,
) -> Result<Vec<u8>> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(provider_name, e))?;
    let response = check_http_status(provider_name, response).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(provider_name, e))?;
    Ok(bytes.to_vec())
}

/// Send a streaming request. Status errors (including 429) surface here,
/// before any chunk is read.
pub(crate) async fn send_stream(
    provider_name: &str,
    request: reqwest::RequestBuilder,
) -> Result<ChunkStream> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(provider_name, e))?;
    let response = check_http_status(provider_name, response).await?;
    Ok(sse_chunks(response.bytes_stream()))
}

/// Decode a server-sent event byte stream into JSON chunks.
///
/// Empty frames and the `[DONE]` sentinel are skipped.
pub(crate) fn sse_chunks<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(bytes.eventsource().filter_map(|event| async move {
        match event {
            Ok(event) => {
                let data = event.data.trim();
                if data.is_empty() || data == "[DONE]" {
                    return None;
                }
                Some(serde_json::from_str::<Value>(data).map_err(AiError::from))
            }
            Err(e) => Some(Err(AiError::Transport(format!("SSE decoding failed: {}", e)))),
        }
    }))
}

/// Resolve the API key for a provider.
///
/// The registry has already folded `key_env` into `context.key`; the
/// driver's conventional environment variable is the last resort.
pub(crate) fn resolve_api_key(context: &ProviderContext, default_env: &str) -> Result<String> {
    if let Some(key) = context.key.as_deref().filter(|key| !key.is_empty()) {
        return Ok(key.to_string());
    }
    std::env::var(default_env).map_err(|_| {
        AiError::Config(format!(
            "No API key configured for provider '{}' and {} is not set",
            context.name, default_env
        ))
    })
}

/// Base URL for a provider, honoring the configured override.
pub(crate) fn base_url(context: &ProviderContext, default: &str) -> String {
    context
        .url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

fn mime_for_path(path: &str) -> &'static str {
    let extension = path.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// Turn local file attachments into inline base64 attachments so request
/// builders never touch the filesystem.
pub(crate) async fn load_attachment(attachment: &Attachment) -> Result<Attachment> {
    match &attachment.source {
        AttachmentSource::Path { path } => {
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                AiError::Config(format!("Unable to read attachment '{}': {}", path, e))
            })?;
            Ok(Attachment {
                kind: attachment.kind,
                source: AttachmentSource::Base64 {
                    data: STANDARD.encode(bytes),
                    mime_type: Some(mime_for_path(path).to_string()),
                },
                name: attachment.name.clone(),
            })
        }
        AttachmentSource::Stored { path, .. } => Err(AiError::Config(format!(
            "Stored attachment '{}' must be loaded by the application before it is sent",
            path
        ))),
        _ => Ok(attachment.clone()),
    }
}

pub(crate) async fn load_attachments(attachments: &[Attachment]) -> Result<Vec<Attachment>> {
    let mut loaded = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        loaded.push(load_attachment(attachment).await?);
    }
    Ok(loaded)
}

/// Load the attachments of every user message in a conversation.
pub(crate) async fn load_message_attachments(messages: &[Message]) -> Result<Vec<Message>> {
    let mut loaded = Vec::with_capacity(messages.len());
    for message in messages {
        loaded.push(match message {
            Message::User {
                content,
                attachments,
            } => Message::User {
                content: content.clone(),
                attachments: load_attachments(attachments).await?,
            },
            other => other.clone(),
        });
    }
    Ok(loaded)
}

/// Base64 payload and MIME type of an inline attachment.
pub(crate) fn inline_data(attachment: &Attachment) -> Option<(&str, &str)> {
    match &attachment.source {
        AttachmentSource::Base64 { data, mime_type } => Some((
            data.as_str(),
            mime_type.as_deref().unwrap_or("application/octet-stream"),
        )),
        _ => None,
    }
}

/// Decode an attachment that must be sent as raw bytes (audio uploads).
pub(crate) fn attachment_bytes(attachment: &Attachment) -> Result<(Vec<u8>, String)> {
    let (data, mime_type) = inline_data(attachment).ok_or_else(|| {
        AiError::Config("Attachment must be inline or a local path to be uploaded".to_string())
    })?;
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| AiError::Config(format!("Attachment is not valid base64: {}", e)))?;
    Ok((bytes, mime_type.to_string()))
}

/// One vendor round trip of a text tool loop.
#[derive(Debug, Clone, Default)]
pub(crate) struct Round {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

fn continue_conversation(
    messages: &mut Vec<Message>,
    text: String,
    calls: Vec<ToolCall>,
    results: Vec<ToolResult>,
) {
    messages.push(Message::Assistant {
        content: text,
        tool_calls: calls,
    });
    messages.push(Message::ToolResult { results });
}

/// Parse a structured reply into its object.
pub(crate) fn structured_output(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim())? {
        Value::Object(map) => Ok(map),
        other => Err(AiError::Serialization(serde::de::Error::custom(format!(
            "structured output must be a JSON object, got {}",
            other
        )))),
    }
}

/// Run a request to completion, invoking the tools the model asks for until
/// it stops asking or `max_steps` rounds have run.
///
/// `send` performs one vendor round trip for the given conversation.
pub(crate) async fn run_tool_loop<F, Fut>(
    context: &ProviderContext,
    request: &TextRequest,
    mut send: F,
) -> Result<AgentResponse>
where
    F: FnMut(Vec<Message>) -> Fut,
    Fut: Future<Output = Result<Round>>,
{
    let meta = Meta::new(&context.name, request.model());
    let max_steps = request.options.max_steps.max(1);
    let mut messages = request.messages.clone();
    let mut response = AgentResponse::new(
        request.invocation_id.clone(),
        String::new(),
        Usage::default(),
        meta.clone(),
    );

    for step in 1..=max_steps {
        let round = send(messages.clone()).await?;
        response.usage += round.usage;
        response.finish_reason = round.finish_reason;
        response.text = round.text.clone();

        let mut record = Step {
            text: round.text.clone(),
            tool_calls: round.tool_calls.clone(),
            tool_results: Vec::new(),
            finish_reason: round.finish_reason,
            usage: round.usage,
            meta: meta.clone(),
        };

        if round.tool_calls.is_empty() || step == max_steps {
            response.tool_calls.extend(round.tool_calls);
            response.steps.push(record);
            break;
        }

        let results = invoke_tool_calls(
            &request.invocation_id,
            &request.tools,
            &round.tool_calls,
            &request.hooks,
        )
        .await?;
        record.tool_results = results.clone();
        response.steps.push(record);
        response.tool_calls.extend(round.tool_calls.iter().cloned());
        response.tool_results.extend(results.iter().cloned());
        continue_conversation(&mut messages, round.text, round.tool_calls, results);
    }

    if request.schema.is_some() {
        response.structured = Some(structured_output(&response.text)?);
    }
    Ok(response)
}

/// Stream a request, running tools between rounds.
///
/// `first` is the already-opened first round; `open` starts each further
/// round for the conversation so far. Every round flows through the same
/// normalizer so the caller sees a single stream start and end.
pub(crate) fn stream_tool_loop<N, F, Fut>(
    mut normalizer: N,
    request: TextRequest,
    first: ChunkStream,
    mut open: F,
) -> EventStream
where
    N: StreamNormalizer + 'static,
    F: FnMut(Vec<Message>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<ChunkStream>> + Send,
{
    Box::pin(async_stream::stream! {
        let max_steps = request.options.max_steps.max(1);
        let mut messages = request.messages.clone();
        let mut chunks = first;
        let mut step = 1;

        loop {
            let mut text = String::new();
            let mut calls = Vec::new();
            while let Some(chunk) = chunks.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                for event in normalizer.normalize(&chunk) {
                    match &event.kind {
                        StreamEventKind::TextDelta(delta) => {
                            text.push_str(&delta.delta);
                        }
                        StreamEventKind::ToolCallStart(start) => {
                            calls.push(start.tool_call.clone());
                        }
                        _ => {}
                    }
                    yield Ok(event);
                }
            }

            if calls.is_empty() || step >= max_steps {
                break;
            }

            for event in normalizer.end_round() {
                yield Ok(event);
            }
            let results = match invoke_tool_calls(
                &request.invocation_id,
                &request.tools,
                &calls,
                &request.hooks,
            )
            .await
            {
                Ok(results) => results,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for result in &results {
                yield Ok(StreamEvent::tool_result(result.clone(), true, None)
                    .with_invocation_id(request.invocation_id.as_str()));
            }

            continue_conversation(&mut messages, text, calls, results);
            chunks = match open(messages.clone()).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            step += 1;
        }

        for event in normalizer.finish() {
            yield Ok(event);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::agent;
    use crate::prompt::AgentPrompt;
    use crate::tool::ToolRequest;
    use crate::traits::Tool;
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use serde_json::json;
    use std::sync::Arc;

    struct Weather;

    #[async_trait]
    impl Tool for Weather {
        fn name(&self) -> &str {
            "weather"
        }

        fn description(&self) -> &str {
            "Current weather"
        }

        async fn handle(&self, request: ToolRequest) -> anyhow::Result<String> {
            Ok(format!("sunny in {}", request.str("city").unwrap_or("nowhere")))
        }
    }

    fn request() -> TextRequest {
        let agent = agent("Forecast.").tool(Weather).max_steps(3);
        TextRequest::new(
            "inv-1",
            AgentPrompt::new(Arc::new(agent), "Weather in Oslo?", vec![], "openai", "gpt-5-mini"),
        )
    }

    fn weather_call() -> ToolCall {
        ToolCall::new(
            "call_1",
            "weather",
            json!({"city": "Oslo"}).as_object().cloned().unwrap(),
        )
    }

    #[test]
    fn vendor_messages_prefer_the_error_object() {
        assert_eq!(
            vendor_message(r#"{"error": {"message": "bad model"}}"#),
            "bad model"
        );
        assert_eq!(vendor_message("upstream exploded"), "upstream exploded");
        assert_eq!(vendor_message(""), "empty response body");
    }

    #[test]
    fn api_keys_come_from_the_context_first() {
        let mut context = ProviderContext::new("openai", "openai");
        context.key = Some("sk-test".into());
        assert_eq!(resolve_api_key(&context, "UNI_AI_UNSET_KEY").unwrap(), "sk-test");

        context.key = None;
        let err = resolve_api_key(&context, "UNI_AI_UNSET_KEY").unwrap_err();
        assert!(err.to_string().contains("UNI_AI_UNSET_KEY is not set"));
    }

    #[test]
    fn base_urls_drop_trailing_slashes() {
        let mut context = ProviderContext::new("openai", "openai");
        assert_eq!(base_url(&context, "https://api.openai.com/v1"), "https://api.openai.com/v1");
        context.url = Some("http://localhost:8080/v1/".into());
        assert_eq!(base_url(&context, "https://api.openai.com/v1"), "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn sse_frames_decode_to_json_chunks() {
        let frames = vec![
            Ok::<_, std::io::Error>("data: {\"type\":\"a\"}\n\n"),
            Ok(": keep-alive\n\n"),
            Ok("event: b\ndata: {\"type\":\"b\"}\n\n"),
            Ok("data: [DONE]\n\n"),
        ];
        let chunks: Vec<Value> = sse_chunks(futures::stream::iter(frames))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks, vec![json!({"type": "a"}), json!({"type": "b"})]);
    }

    #[tokio::test]
    async fn stored_attachments_are_rejected() {
        let attachment = Attachment::stored(crate::data::AttachmentKind::Document, "a.pdf", None);
        let err = load_attachment(&attachment).await.unwrap_err();
        assert!(err.to_string().contains("must be loaded by the application"));
    }

    #[tokio::test]
    async fn tool_loop_runs_tools_between_rounds() {
        let context = ProviderContext::new("openai", "openai");
        let mut rounds = vec![
            Round {
                tool_calls: vec![weather_call()],
                usage: Usage::new(10, 2),
                finish_reason: FinishReason::ToolCalls,
                ..Round::default()
            },
            Round {
                text: "It is sunny.".into(),
                usage: Usage::new(20, 4),
                finish_reason: FinishReason::Stop,
                ..Round::default()
            },
        ]
        .into_iter();
        let mut seen = Vec::new();

        let response = run_tool_loop(&context, &request(), |messages| {
            seen.push(messages.len());
            let round = rounds.next().unwrap();
            async move { Ok(round) }
        })
        .await
        .unwrap();

        assert_eq!(response.text, "It is sunny.");
        assert_eq!(response.steps.len(), 2);
        assert_eq!(response.tool_results[0].result, "sunny in Oslo");
        assert_eq!(response.usage, Usage::new(30, 6));
        assert_eq!(seen, vec![1, 3]);
    }

    #[tokio::test]
    async fn tool_loop_stops_at_max_steps() {
        let context = ProviderContext::new("openai", "openai");
        let mut request = request();
        request.options.max_steps = 1;

        let response = run_tool_loop(&context, &request, |_| async {
            Ok(Round {
                tool_calls: vec![weather_call()],
                finish_reason: FinishReason::ToolCalls,
                ..Round::default()
            })
        })
        .await
        .unwrap();

        assert_eq!(response.steps.len(), 1);
        assert!(response.tool_results.is_empty());
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
    }

    #[tokio::test]
    async fn structured_replies_must_be_objects() {
        assert_eq!(structured_output(r#"{"a": 1}"#).unwrap()["a"], json!(1));
        assert!(structured_output("[1]").is_err());
    }
}
