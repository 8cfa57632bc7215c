use crate::api::ProviderDefaults;
use crate::data::{Attachment, AttachmentKind, AttachmentSource, FinishReason, Message, ToolCall, Usage};
use crate::error::{AiError, Result};
use crate::normalizer::{AnthropicNormalizer, NormalizerState, unwrap_tool_arguments};
use crate::prompt::TextRequest;
use crate::provider::remote_common::{
    ChunkStream, Round, base_url, load_message_attachments, resolve_api_key, run_tool_loop,
    send_json, send_stream, stream_tool_loop,
};
use crate::response::AgentResponse;
use crate::streaming::EventStream;
use crate::traits::{ProviderContext, ProviderDriver, ProviderGateways, TextGateway};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use std::sync::Arc;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const PROVIDER_NAME: &str = "Anthropic";
const DEFAULT_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;
const STRUCTURED_OUTPUTS_BETA: &str = "structured-outputs-2025-11-13";

/// Driver for the [Anthropic Messages API](https://docs.anthropic.com/en/api/messages).
/// Text only.
///
/// Options: `anthropic_version` overrides the version header and
/// `max_tokens` sets the ceiling used when an agent does not set one.
pub struct AnthropicDriver {
    client: Client,
}

impl AnthropicDriver {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for AnthropicDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderDriver for AnthropicDriver {
    fn driver_id(&self) -> &str {
        "anthropic"
    }

    fn defaults(&self) -> ProviderDefaults {
        ProviderDefaults {
            text: Some("claude-sonnet-4-5-20250929".to_string()),
            ..ProviderDefaults::default()
        }
    }

    fn create(&self, _context: &ProviderContext) -> Result<ProviderGateways> {
        Ok(ProviderGateways {
            text: Some(Arc::new(AnthropicTextGateway {
                client: self.client.clone(),
            })),
            ..ProviderGateways::default()
        })
    }
}

#[derive(Clone)]
struct AnthropicTextGateway {
    client: Client,
}

impl AnthropicTextGateway {
    fn post(&self, context: &ProviderContext, structured: bool) -> Result<RequestBuilder> {
        let api_key = resolve_api_key(context, API_KEY_ENV)?;
        let version = context
            .option_str("anthropic_version")
            .unwrap_or(DEFAULT_VERSION);
        let mut builder = self
            .client
            .post(format!("{}/messages", base_url(context, API_BASE)))
            .header("x-api-key", api_key)
            .header("anthropic-version", version);
        if structured {
            builder = builder.header("anthropic-beta", STRUCTURED_OUTPUTS_BETA);
        }
        Ok(builder)
    }

    async fn respond(
        &self,
        context: &ProviderContext,
        request: &TextRequest,
        messages: &[Message],
    ) -> Result<Round> {
        let body = build_anthropic_payload(context, request, messages, false)?;
        let response = send_json(
            PROVIDER_NAME,
            self.post(context, request.schema.is_some())?.json(&body),
        )
        .await?;
        Ok(parse_anthropic_round(&response))
    }

    async fn open_stream(
        &self,
        context: &ProviderContext,
        request: &TextRequest,
        messages: &[Message],
    ) -> Result<ChunkStream> {
        let body = build_anthropic_payload(context, request, messages, true)?;
        send_stream(
            PROVIDER_NAME,
            self.post(context, request.schema.is_some())?.json(&body),
        )
        .await
    }
}

fn content_block(attachment: &Attachment) -> Result<Value> {
    let block_type = match attachment.kind {
        AttachmentKind::Image => "image",
        AttachmentKind::Document => "document",
        AttachmentKind::Audio => {
            return Err(AiError::Config(
                "Anthropic does not accept audio attachments".to_string(),
            ));
        }
    };
    let source = match &attachment.source {
        AttachmentSource::Base64 { data, mime_type } => json!({
            "type": "base64",
            "media_type": mime_type.as_deref().unwrap_or("application/octet-stream"),
            "data": data,
        }),
        AttachmentSource::Url { url } => json!({ "type": "url", "url": url }),
        AttachmentSource::ProviderFile { id } => json!({ "type": "file", "file_id": id }),
        _ => {
            return Err(AiError::Config(
                "Attachment must be loaded before it is sent to Anthropic".to_string(),
            ));
        }
    };
    Ok(json!({ "type": block_type, "source": source }))
}

fn anthropic_messages(messages: &[Message]) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        out.push(match message {
            Message::User {
                content,
                attachments,
            } => {
                let mut blocks = Vec::with_capacity(attachments.len() + 1);
                for attachment in attachments {
                    blocks.push(content_block(attachment)?);
                }
                blocks.push(json!({ "type": "text", "text": content }));
                json!({ "role": "user", "content": blocks })
            }
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                if !content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": content }));
                }
                for call in tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                json!({ "role": "assistant", "content": blocks })
            }
            Message::ToolResult { results } => {
                let blocks: Vec<Value> = results
                    .iter()
                    .map(|result| {
                        json!({
                            "type": "tool_result",
                            "tool_use_id": result.id,
                            "content": result.result,
                        })
                    })
                    .collect();
                json!({ "role": "user", "content": blocks })
            }
        });
    }
    Ok(out)
}

fn build_anthropic_payload(
    context: &ProviderContext,
    request: &TextRequest,
    messages: &[Message],
    stream: bool,
) -> Result<Value> {
    let max_tokens = request
        .options
        .max_tokens
        .map(u64::from)
        .or_else(|| context.options.get("max_tokens").and_then(Value::as_u64))
        .unwrap_or(DEFAULT_MAX_TOKENS);

    let mut body = json!({
        "model": request.model(),
        "max_tokens": max_tokens,
        "messages": anthropic_messages(messages)?,
    });
    if !request.instructions.is_empty() {
        body["system"] = json!(request.instructions);
    }
    if let Some(temperature) = request.options.temperature {
        body["temperature"] = json!(temperature);
    }
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "input_schema": tool.schema(),
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    if let Some(schema) = &request.schema {
        body["output_format"] = json!({ "type": "json_schema", "schema": schema });
    }
    if stream {
        body["stream"] = json!(true);
    }
    Ok(body)
}

fn parse_anthropic_round(response: &Value) -> Round {
    let usage = &response["usage"];
    let mut round = Round {
        usage: Usage {
            prompt_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
            completion_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
            cache_write_input_tokens: usage["cache_creation_input_tokens"].as_u64().unwrap_or(0),
            cache_read_input_tokens: usage["cache_read_input_tokens"].as_u64().unwrap_or(0),
            reasoning_tokens: 0,
        },
        finish_reason: response["stop_reason"]
            .as_str()
            .map(FinishReason::from_vendor)
            .unwrap_or_default(),
        ..Round::default()
    };
    for block in response["content"].as_array().into_iter().flatten() {
        match block["type"].as_str() {
            Some("text") => round.text.push_str(block["text"].as_str().unwrap_or_default()),
            Some("tool_use") => round.tool_calls.push(ToolCall::new(
                block["id"].as_str().unwrap_or_default(),
                block["name"].as_str().unwrap_or_default(),
                unwrap_tool_arguments(&block["input"]),
            )),
            _ => {}
        }
    }
    round
}

#[async_trait]
impl TextGateway for AnthropicTextGateway {
    async fn generate_text(
        &self,
        context: &ProviderContext,
        mut request: TextRequest,
    ) -> Result<AgentResponse> {
        request.messages = load_message_attachments(&request.messages).await?;
        let request = &request;
        run_tool_loop(context, request, move |messages| async move {
            self.respond(context, request, &messages).await
        })
        .await
    }

    async fn stream_text(
        &self,
        context: &ProviderContext,
        mut request: TextRequest,
    ) -> Result<EventStream> {
        request.messages = load_message_attachments(&request.messages).await?;
        let first = self.open_stream(context, &request, &request.messages).await?;
        let normalizer = AnthropicNormalizer::new(NormalizerState::new(
            request.invocation_id.as_str(),
            context.name.as_str(),
            request.model(),
        ));

        let (gateway, context, follow_up) = (self.clone(), context.clone(), request.clone());
        Ok(stream_tool_loop(normalizer, request, first, move |messages| {
            let (gateway, context, request) = (gateway.clone(), context.clone(), follow_up.clone());
            async move { gateway.open_stream(&context, &request, &messages).await }
        }))
    }
}
