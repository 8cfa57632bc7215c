use crate::api::ProviderDefaults;
use crate::data::{
    Attachment, AttachmentSource, FinishReason, GeneratedImage, Message, Meta, ToolCall, Usage,
};
use crate::error::{AiError, Result};
use crate::normalizer::{GeminiNormalizer, NormalizerState, unwrap_tool_arguments};
use crate::prompt::{EmbeddingsPrompt, ImagePrompt, TextRequest};
use crate::provider::remote_common::{
    ChunkStream, Round, base_url, inline_data, load_attachments, load_message_attachments,
    resolve_api_key, run_tool_loop, send_json, send_stream, stream_tool_loop,
};
use crate::response::{AgentResponse, EmbeddingsResponse, ImageResponse};
use crate::streaming::{EventStream, new_id};
use crate::traits::{
    EmbeddingGateway, ImageGateway, ProviderContext, ProviderDriver, ProviderGateways,
    TextGateway,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use std::sync::Arc;

const API_HOST: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_API_VERSION: &str = "v1beta";
const API_KEY_ENV: &str = "GEMINI_API_KEY";
const PROVIDER_NAME: &str = "Gemini";

/// Driver for the Google Gemini API: text (with tools and streaming),
/// image generation and batch embeddings.
///
/// The `api_version` option selects the API version path (default
/// `v1beta`).
pub struct GeminiDriver {
    client: Client,
}

impl GeminiDriver {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for GeminiDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderDriver for GeminiDriver {
    fn driver_id(&self) -> &str {
        "gemini"
    }

    fn defaults(&self) -> ProviderDefaults {
        ProviderDefaults {
            text: Some("gemini-3-flash-preview".to_string()),
            image: Some("gemini-3-pro-image-preview".to_string()),
            embeddings: Some("gemini-embedding-001".to_string()),
            embedding_dimensions: Some(3072),
            ..ProviderDefaults::default()
        }
    }

    fn create(&self, _context: &ProviderContext) -> Result<ProviderGateways> {
        let gateway = Arc::new(GeminiGateway {
            client: self.client.clone(),
        });
        Ok(ProviderGateways {
            text: Some(gateway.clone()),
            image: Some(gateway.clone()),
            embeddings: Some(gateway),
            ..ProviderGateways::default()
        })
    }
}

#[derive(Clone)]
struct GeminiGateway {
    client: Client,
}

impl GeminiGateway {
    /// POST to `models/{model}:{method}`.
    fn post(&self, context: &ProviderContext, model: &str, method: &str) -> Result<RequestBuilder> {
        let api_key = resolve_api_key(context, API_KEY_ENV)?;
        let version = context
            .option_str("api_version")
            .unwrap_or(DEFAULT_API_VERSION);
        let url = format!(
            "{}/models/{}:{}",
            base_url(context, &format!("{}/{}", API_HOST, version)),
            model,
            method
        );
        Ok(self.client.post(url).header("x-goog-api-key", api_key))
    }

    async fn respond(
        &self,
        context: &ProviderContext,
        request: &TextRequest,
        messages: &[Message],
    ) -> Result<Round> {
        let body = build_generate_payload(request, messages)?;
        let response = send_json(
            PROVIDER_NAME,
            self.post(context, request.model(), "generateContent")?
                .json(&body),
        )
        .await?;
        Ok(parse_generate_round(&response))
    }

    async fn open_stream(
        &self,
        context: &ProviderContext,
        request: &TextRequest,
        messages: &[Message],
    ) -> Result<ChunkStream> {
        let body = build_generate_payload(request, messages)?;
        send_stream(
            PROVIDER_NAME,
            self.post(context, request.model(), "streamGenerateContent")?
                .query(&[("alt", "sse")])
                .json(&body),
        )
        .await
    }
}

fn attachment_part(attachment: &Attachment) -> Result<Value> {
    if let Some((data, mime_type)) = inline_data(attachment) {
        return Ok(json!({ "inlineData": { "mimeType": mime_type, "data": data } }));
    }
    match &attachment.source {
        AttachmentSource::Url { url } | AttachmentSource::ProviderFile { id: url } => {
            let mut file = json!({ "fileUri": url });
            if let Some(mime_type) = attachment.mime_type() {
                file["mimeType"] = json!(mime_type);
            }
            Ok(json!({ "fileData": file }))
        }
        _ => Err(AiError::Config(
            "Attachment must be loaded before it is sent to Gemini".to_string(),
        )),
    }
}

/// Gemini alternates `user` and `model` turns; tool results travel as
/// `functionResponse` parts of a user turn.
fn gemini_contents(messages: &[Message]) -> Result<Vec<Value>> {
    let mut contents = Vec::with_capacity(messages.len());
    for message in messages {
        contents.push(match message {
            Message::User {
                content,
                attachments,
            } => {
                let mut parts = vec![json!({ "text": content })];
                for attachment in attachments {
                    parts.push(attachment_part(attachment)?);
                }
                json!({ "role": "user", "parts": parts })
            }
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut parts = Vec::new();
                if !content.is_empty() {
                    parts.push(json!({ "text": content }));
                }
                for call in tool_calls {
                    parts.push(json!({
                        "functionCall": { "id": call.id, "name": call.name, "args": call.arguments }
                    }));
                }
                json!({ "role": "model", "parts": parts })
            }
            Message::ToolResult { results } => {
                let parts: Vec<Value> = results
                    .iter()
                    .map(|result| {
                        json!({
                            "functionResponse": {
                                "id": result.id,
                                "name": result.name,
                                "response": { "result": result.result },
                            }
                        })
                    })
                    .collect();
                json!({ "role": "user", "parts": parts })
            }
        });
    }
    Ok(contents)
}

fn build_generate_payload(request: &TextRequest, messages: &[Message]) -> Result<Value> {
    let mut body = json!({ "contents": gemini_contents(messages)? });
    if !request.instructions.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": request.instructions }] });
    }
    if !request.tools.is_empty() {
        let declarations: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.schema(),
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }

    let mut config = serde_json::Map::new();
    if let Some(max_tokens) = request.options.max_tokens {
        config.insert("maxOutputTokens".into(), json!(max_tokens));
    }
    if let Some(temperature) = request.options.temperature {
        config.insert("temperature".into(), json!(temperature));
    }
    if let Some(schema) = &request.schema {
        config.insert("responseMimeType".into(), json!("application/json"));
        config.insert("responseJsonSchema".into(), schema.clone());
    }
    if !config.is_empty() {
        body["generationConfig"] = Value::Object(config);
    }
    Ok(body)
}

fn gemini_usage(metadata: &Value) -> Usage {
    Usage {
        prompt_tokens: metadata["promptTokenCount"].as_u64().unwrap_or(0),
        completion_tokens: metadata["candidatesTokenCount"].as_u64().unwrap_or(0),
        cache_write_input_tokens: 0,
        cache_read_input_tokens: metadata["cachedContentTokenCount"].as_u64().unwrap_or(0),
        reasoning_tokens: metadata["thoughtsTokenCount"].as_u64().unwrap_or(0),
    }
}

fn parse_generate_round(response: &Value) -> Round {
    let candidate = &response["candidates"][0];
    let mut round = Round {
        usage: gemini_usage(&response["usageMetadata"]),
        ..Round::default()
    };
    for part in candidate["content"]["parts"].as_array().into_iter().flatten() {
        if let Some(call) = part.get("functionCall") {
            let id = call["id"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(new_id);
            round.tool_calls.push(ToolCall::new(
                id,
                call["name"].as_str().unwrap_or_default(),
                unwrap_tool_arguments(&call["args"]),
            ));
        } else if part["thought"].as_bool() != Some(true)
            && let Some(text) = part["text"].as_str()
        {
            round.text.push_str(text);
        }
    }
    round.finish_reason = if !round.tool_calls.is_empty() {
        FinishReason::ToolCalls
    } else {
        candidate["finishReason"]
            .as_str()
            .map(FinishReason::from_vendor)
            .unwrap_or(FinishReason::Stop)
    };
    round
}

#[async_trait]
impl TextGateway for GeminiGateway {
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
        let normalizer = GeminiNormalizer::new(NormalizerState::new(
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

/// Gemini sizes images by resolution tier and shapes them by aspect ratio.
fn image_config(size: Option<&str>, quality: Option<&str>) -> Value {
    let tier = match quality {
        Some("medium" | "2K") => "2K",
        Some("high" | "4K") => "4K",
        _ => "1K",
    };
    let mut config = json!({ "imageSize": tier });
    if let Some(ratio @ ("1:1" | "2:3" | "3:2")) = size {
        config["aspectRatio"] = json!(ratio);
    }
    config
}

fn parse_image_response(response: &Value, meta: Meta) -> ImageResponse {
    let images = response["candidates"][0]["content"]["parts"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|part| part.get("inlineData"))
        .map(|data| GeneratedImage {
            image: data["data"].as_str().unwrap_or_default().to_string(),
            mime_type: data["mimeType"].as_str().map(str::to_string),
        })
        .collect();
    ImageResponse {
        images,
        usage: gemini_usage(&response["usageMetadata"]),
        meta,
    }
}

#[async_trait]
impl ImageGateway for GeminiGateway {
    async fn generate_image(
        &self,
        context: &ProviderContext,
        prompt: &ImagePrompt,
    ) -> Result<ImageResponse> {
        let mut parts = vec![json!({ "text": prompt.prompt })];
        for attachment in load_attachments(&prompt.attachments).await? {
            parts.push(attachment_part(&attachment)?);
        }
        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": image_config(prompt.size.as_deref(), prompt.quality.as_deref()),
            }
        });
        let response = send_json(
            PROVIDER_NAME,
            self.post(context, &prompt.model, "generateContent")?
                .json(&body),
        )
        .await?;
        Ok(parse_image_response(
            &response,
            Meta::new(&context.name, &prompt.model),
        ))
    }
}

fn parse_embeddings(response: &Value) -> Result<Vec<Vec<f32>>> {
    let rows = response["embeddings"]
        .as_array()
        .ok_or_else(|| AiError::Transport("Gemini: invalid embeddings response".to_string()))?;
    rows.iter()
        .map(|row| {
            row["values"]
                .as_array()
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect()
                })
                .ok_or_else(|| AiError::Transport("Gemini: embedding without values".to_string()))
        })
        .collect()
}

#[async_trait]
impl EmbeddingGateway for GeminiGateway {
    async fn generate_embeddings(
        &self,
        context: &ProviderContext,
        prompt: &EmbeddingsPrompt,
    ) -> Result<EmbeddingsResponse> {
        let requests: Vec<Value> = prompt
            .inputs
            .iter()
            .map(|input| {
                json!({
                    "model": format!("models/{}", prompt.model),
                    "content": { "parts": [{ "text": input }] },
                    "outputDimensionality": prompt.dimensions,
                })
            })
            .collect();
        let response = send_json(
            PROVIDER_NAME,
            self.post(context, &prompt.model, "batchEmbedContents")?
                .json(&json!({ "requests": requests })),
        )
        .await?;
        Ok(EmbeddingsResponse {
            embeddings: parse_embeddings(&response)?,
            tokens: 0,
            meta: Meta::new(&context.name, &prompt.model),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::agent;
    use crate::data::ToolResult;
    use crate::prompt::AgentPrompt;

    fn request(schema: Option<Value>) -> TextRequest {
        let mut agent = agent("Answer in French.").temperature(0.2);
        if let Some(schema) = schema {
            agent = agent.schema(schema);
        }
        TextRequest::new(
            "inv-1",
            AgentPrompt::new(
                Arc::new(agent),
                "Hello",
                vec![Attachment::image_base64("iVBORw0=", "image/png")],
                "gemini",
                "gemini-3-flash-preview",
            ),
        )
    }

    #[test]
    fn payload_uses_system_instruction_and_inline_data() {
        let request = request(None);
        let body = build_generate_payload(&request, &request.messages).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Answer in French.");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(
            body["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
        assert!(body["generationConfig"]["temperature"].is_number());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn structured_output_requests_json() {
        let request = request(Some(json!({ "type": "object" })));
        let body = build_generate_payload(&request, &request.messages).unwrap();
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseJsonSchema"]["type"], "object");
    }

    #[test]
    fn tool_turns_use_model_and_function_response_parts() {
        let call = ToolCall::new("c1", "lookup", json!({"q": "x"}).as_object().cloned().unwrap());
        let contents = gemini_contents(&[
            Message::Assistant {
                content: String::new(),
                tool_calls: vec![call.clone()],
            },
            Message::ToolResult {
                results: vec![ToolResult::for_call(&call, "found")],
            },
        ])
        .unwrap();
        assert_eq!(contents[0]["role"], "model");
        assert_eq!(contents[0]["parts"][0]["functionCall"]["args"]["q"], "x");
        assert_eq!(
            contents[1]["parts"][0]["functionResponse"]["response"]["result"],
            "found"
        );
    }

    #[test]
    fn thoughts_are_not_part_of_the_text() {
        let round = parse_generate_round(&json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "thinking...", "thought": true },
                    { "text": "Bonjour" }
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 3, "candidatesTokenCount": 1,
                               "thoughtsTokenCount": 5 }
        }));
        assert_eq!(round.text, "Bonjour");
        assert_eq!(round.finish_reason, FinishReason::Stop);
        assert_eq!(round.usage.reasoning_tokens, 5);
    }

    #[test]
    fn function_calls_without_ids_get_one() {
        let round = parse_generate_round(&json!({
            "candidates": [{ "content": { "parts": [
                { "functionCall": { "name": "lookup", "args": { "q": "x" } } }
            ]}}]
        }));
        assert!(!round.tool_calls[0].id.is_empty());
        assert_eq!(round.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn image_options_map_quality_and_ratio() {
        assert_eq!(
            image_config(Some("3:2"), Some("high")),
            json!({ "imageSize": "4K", "aspectRatio": "3:2" })
        );
        assert_eq!(image_config(Some("16:9"), None), json!({ "imageSize": "1K" }));
    }

    #[test]
    fn embeddings_without_values_are_rejected() {
        assert_eq!(
            parse_embeddings(&json!({ "embeddings": [{ "values": [0.25, 0.75] }] })).unwrap(),
            vec![vec![0.25, 0.75]]
        );
        assert!(parse_embeddings(&json!({ "embeddings": [{}] })).is_err());
        assert!(parse_embeddings(&json!({})).is_err());
    }
}
