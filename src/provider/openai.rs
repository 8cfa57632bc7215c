use crate::api::ProviderDefaults;
use crate::data::{
    Attachment, AttachmentKind, AttachmentSource, FinishReason, GeneratedImage, Message, Meta,
    StoreFileCounts, ToolCall, TranscriptionSegment, Usage,
};
use crate::error::{AiError, Result};
use crate::normalizer::{NormalizerState, OpenAiNormalizer, unwrap_tool_arguments};
use crate::prompt::{
    AudioPrompt, EmbeddingsPrompt, FileUpload, ImagePrompt, StoreRequest, TextRequest,
    TranscriptionPrompt,
};
use crate::provider::remote_common::{
    ChunkStream, Round, attachment_bytes, base_url, inline_data, load_attachment,
    load_attachments, load_message_attachments, resolve_api_key, run_tool_loop, send_bytes,
    send_json, send_stream, stream_tool_loop,
};
use crate::response::{
    AgentResponse, AudioResponse, EmbeddingsResponse, FileResponse, ImageResponse, StoreResponse,
    StoredFileResponse, TranscriptionResponse,
};
use crate::streaming::EventStream;
use crate::traits::{
    AudioGateway, EmbeddingGateway, FileGateway, ImageGateway, ProviderContext, ProviderDriver,
    ProviderGateways, StoreGateway, TextGateway, TranscriptionGateway,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{Value, json};
use std::sync::Arc;

const API_BASE: &str = "https://api.openai.com/v1";
const API_KEY_ENV: &str = "OPENAI_API_KEY";
const PROVIDER_NAME: &str = "OpenAI";

/// Driver for the OpenAI API: Responses-API text generation with tools and
/// streaming, image generation, speech, transcription, embeddings, files and
/// vector stores.
pub struct OpenAiDriver {
    client: Client,
}

impl OpenAiDriver {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for OpenAiDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderDriver for OpenAiDriver {
    fn driver_id(&self) -> &str {
        "openai"
    }

    fn defaults(&self) -> ProviderDefaults {
        ProviderDefaults {
            text: Some("gpt-5-mini".to_string()),
            image: Some("gpt-image-1.5".to_string()),
            audio: Some("gpt-4o-mini-tts".to_string()),
            transcription: Some("gpt-4o-transcribe-diarize".to_string()),
            embeddings: Some("text-embedding-3-small".to_string()),
            embedding_dimensions: Some(1536),
            reranking: None,
        }
    }

    fn create(&self, _context: &ProviderContext) -> Result<ProviderGateways> {
        let gateway = Arc::new(OpenAiGateway {
            client: self.client.clone(),
        });
        Ok(ProviderGateways {
            text: Some(gateway.clone()),
            image: Some(gateway.clone()),
            audio: Some(gateway.clone()),
            transcription: Some(gateway.clone()),
            embeddings: Some(gateway.clone()),
            reranking: None,
            files: Some(gateway.clone()),
            stores: Some(gateway),
        })
    }
}

#[derive(Clone)]
struct OpenAiGateway {
    client: Client,
}

impl OpenAiGateway {
    fn request(
        &self,
        context: &ProviderContext,
        method: Method,
        path: &str,
    ) -> Result<RequestBuilder> {
        let api_key = resolve_api_key(context, API_KEY_ENV)?;
        let url = format!("{}{}", base_url(context, API_BASE), path);
        let mut builder = self.client.request(method, url).bearer_auth(api_key);
        if let Some(organization) = context.option_str("organization") {
            builder = builder.header("OpenAI-Organization", organization);
        }
        if let Some(project) = context.option_str("project") {
            builder = builder.header("OpenAI-Project", project);
        }
        Ok(builder)
    }

    async fn respond(
        &self,
        context: &ProviderContext,
        request: &TextRequest,
        messages: &[Message],
    ) -> Result<Round> {
        let body = build_responses_payload(request, messages, false)?;
        let response = send_json(
            PROVIDER_NAME,
            self.request(context, Method::POST, "/responses")?.json(&body),
        )
        .await?;
        Ok(parse_responses_round(&response))
    }

    async fn open_stream(
        &self,
        context: &ProviderContext,
        request: &TextRequest,
        messages: &[Message],
    ) -> Result<ChunkStream> {
        let body = build_responses_payload(request, messages, true)?;
        send_stream(
            PROVIDER_NAME,
            self.request(context, Method::POST, "/responses")?.json(&body),
        )
        .await
    }
}

fn data_url(data: &str, mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, data)
}

fn input_attachment(attachment: &Attachment) -> Result<Value> {
    let kind = attachment.kind;
    Ok(match (&attachment.source, kind) {
        (AttachmentSource::Base64 { .. }, AttachmentKind::Image) => {
            let (data, mime_type) = inline_data(attachment).unwrap_or_default();
            json!({ "type": "input_image", "image_url": data_url(data, mime_type) })
        }
        (AttachmentSource::Base64 { .. }, AttachmentKind::Document) => {
            let (data, mime_type) = inline_data(attachment).unwrap_or_default();
            json!({
                "type": "input_file",
                "filename": attachment.name.as_deref().unwrap_or("document"),
                "file_data": data_url(data, mime_type),
            })
        }
        (AttachmentSource::Url { url }, AttachmentKind::Image) => {
            json!({ "type": "input_image", "image_url": url })
        }
        (AttachmentSource::Url { url }, AttachmentKind::Document) => {
            json!({ "type": "input_file", "file_url": url })
        }
        (AttachmentSource::ProviderFile { id }, AttachmentKind::Image) => {
            json!({ "type": "input_image", "file_id": id })
        }
        (AttachmentSource::ProviderFile { id }, AttachmentKind::Document) => {
            json!({ "type": "input_file", "file_id": id })
        }
        (_, AttachmentKind::Audio) => {
            return Err(AiError::Config(
                "OpenAI text generation does not accept audio attachments".to_string(),
            ));
        }
        _ => {
            return Err(AiError::Config(
                "Attachment must be loaded before it is sent to OpenAI".to_string(),
            ));
        }
    })
}

fn input_items(messages: &[Message]) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    for message in messages {
        match message {
            Message::User {
                content,
                attachments,
            } => {
                let mut parts = vec![json!({ "type": "input_text", "text": content })];
                for attachment in attachments {
                    parts.push(input_attachment(attachment)?);
                }
                items.push(json!({ "role": "user", "content": parts }));
            }
            Message::Assistant {
                content,
                tool_calls,
            } => {
                if !content.is_empty() {
                    items.push(json!({ "role": "assistant", "content": content }));
                }
                for call in tool_calls {
                    items.push(json!({
                        "type": "function_call",
                        "call_id": call.id,
                        "name": call.name,
                        "arguments": Value::Object(call.arguments.clone()).to_string(),
                    }));
                }
            }
            Message::ToolResult { results } => {
                for result in results {
                    items.push(json!({
                        "type": "function_call_output",
                        "call_id": result.id,
                        "output": result.result,
                    }));
                }
            }
        }
    }
    Ok(items)
}

/// Build a Responses API request body for the conversation so far.
fn build_responses_payload(
    request: &TextRequest,
    messages: &[Message],
    stream: bool,
) -> Result<Value> {
    let mut body = json!({
        "model": request.model(),
        "input": input_items(messages)?,
    });
    if !request.instructions.is_empty() {
        body["instructions"] = json!(request.instructions);
    }
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.schema(),
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    if let Some(schema) = &request.schema {
        body["text"] = json!({
            "format": {
                "type": "json_schema",
                "name": "schema_definition",
                "schema": schema,
            }
        });
    }
    if let Some(max_tokens) = request.options.max_tokens {
        body["max_output_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.options.temperature {
        body["temperature"] = json!(temperature);
    }
    if stream {
        body["stream"] = json!(true);
    }
    Ok(body)
}

fn responses_usage(usage: &Value) -> Usage {
    Usage {
        prompt_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
        completion_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
        cache_write_input_tokens: 0,
        cache_read_input_tokens: usage["input_tokens_details"]["cached_tokens"]
            .as_u64()
            .unwrap_or(0),
        reasoning_tokens: usage["output_tokens_details"]["reasoning_tokens"]
            .as_u64()
            .unwrap_or(0),
    }
}

fn parse_responses_round(response: &Value) -> Round {
    let mut round = Round {
        usage: responses_usage(&response["usage"]),
        ..Round::default()
    };
    for item in response["output"].as_array().into_iter().flatten() {
        match item["type"].as_str() {
            Some("message") => {
                for part in item["content"].as_array().into_iter().flatten() {
                    if part["type"] == "output_text"
                        && let Some(text) = part["text"].as_str()
                    {
                        round.text.push_str(text);
                    }
                }
            }
            Some("function_call") => round.tool_calls.push(ToolCall::new(
                item["call_id"].as_str().unwrap_or_default(),
                item["name"].as_str().unwrap_or_default(),
                unwrap_tool_arguments(&item["arguments"]),
            )),
            _ => {}
        }
    }
    round.finish_reason = if response["status"] == "incomplete" {
        FinishReason::Length
    } else if !round.tool_calls.is_empty() {
        FinishReason::ToolCalls
    } else {
        FinishReason::Stop
    };
    round
}

#[async_trait]
impl TextGateway for OpenAiGateway {
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
        let normalizer = OpenAiNormalizer::new(NormalizerState::new(
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

/// Map an aspect ratio onto the closest size the image API accepts.
fn image_size(size: Option<&str>) -> &str {
    match size {
        Some("1:1") => "1024x1024",
        Some("3:2") => "1536x1024",
        Some("2:3") => "1024x1536",
        Some(other) => other,
        None => "auto",
    }
}

fn parse_image_response(response: &Value, meta: Meta) -> ImageResponse {
    let images = response["data"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| item["b64_json"].as_str())
        .map(|image| GeneratedImage {
            image: image.to_string(),
            mime_type: Some("image/png".to_string()),
        })
        .collect();
    ImageResponse {
        images,
        usage: responses_usage(&response["usage"]),
        meta,
    }
}

#[async_trait]
impl ImageGateway for OpenAiGateway {
    async fn generate_image(
        &self,
        context: &ProviderContext,
        prompt: &ImagePrompt,
    ) -> Result<ImageResponse> {
        let meta = Meta::new(&context.name, &prompt.model);
        let size = image_size(prompt.size.as_deref()).to_string();
        let quality = prompt.quality.clone().unwrap_or_else(|| "auto".to_string());

        let response = if prompt.attachments.is_empty() {
            let body = json!({
                "model": prompt.model,
                "prompt": prompt.prompt,
                "size": size,
                "quality": quality,
                "n": 1,
            });
            send_json(
                PROVIDER_NAME,
                self.request(context, Method::POST, "/images/generations")?
                    .json(&body),
            )
            .await?
        } else {
            let mut form = Form::new()
                .text("model", prompt.model.clone())
                .text("prompt", prompt.prompt.clone())
                .text("size", size)
                .text("quality", quality);
            for (i, attachment) in load_attachments(&prompt.attachments)
                .await?
                .iter()
                .enumerate()
            {
                let (bytes, mime_type) = attachment_bytes(attachment)?;
                let part = Part::bytes(bytes)
                    .file_name(format!("image-{}", i))
                    .mime_str(&mime_type)
                    .map_err(|e| AiError::Config(format!("Invalid MIME type: {}", e)))?;
                form = form.part("image[]", part);
            }
            send_json(
                PROVIDER_NAME,
                self.request(context, Method::POST, "/images/edits")?
                    .multipart(form),
            )
            .await?
        };
        Ok(parse_image_response(&response, meta))
    }
}

/// Map the portable voice names onto OpenAI voices.
fn voice_for(voice: &str) -> &str {
    match voice {
        "default-male" => "ash",
        "default-female" => "alloy",
        other => other,
    }
}

#[async_trait]
impl AudioGateway for OpenAiGateway {
    async fn generate_audio(
        &self,
        context: &ProviderContext,
        prompt: &AudioPrompt,
    ) -> Result<AudioResponse> {
        let mut body = json!({
            "model": prompt.model,
            "input": prompt.text,
            "voice": voice_for(&prompt.voice),
            "response_format": "mp3",
        });
        if let Some(instructions) = &prompt.instructions {
            body["instructions"] = json!(instructions);
        }
        let bytes = send_bytes(
            PROVIDER_NAME,
            self.request(context, Method::POST, "/audio/speech")?
                .json(&body),
        )
        .await?;
        Ok(AudioResponse {
            audio: STANDARD.encode(bytes),
            mime_type: Some("audio/mpeg".to_string()),
            meta: Meta::new(&context.name, &prompt.model),
        })
    }
}

fn parse_transcription(response: &Value, meta: Meta) -> TranscriptionResponse {
    let segments = response["segments"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|segment| TranscriptionSegment {
            text: segment["text"].as_str().unwrap_or_default().to_string(),
            speaker: segment["speaker"].as_str().map(str::to_string),
            start: segment["start"].as_f64().unwrap_or(0.0),
            end: segment["end"].as_f64().unwrap_or(0.0),
        })
        .collect();
    TranscriptionResponse {
        text: response["text"].as_str().unwrap_or_default().to_string(),
        segments,
        usage: responses_usage(&response["usage"]),
        meta,
    }
}

#[async_trait]
impl TranscriptionGateway for OpenAiGateway {
    async fn generate_transcription(
        &self,
        context: &ProviderContext,
        prompt: &TranscriptionPrompt,
    ) -> Result<TranscriptionResponse> {
        let audio = load_attachment(&prompt.audio).await?;
        let (bytes, mime_type) = attachment_bytes(&audio)?;
        let file = Part::bytes(bytes)
            .file_name(audio.name.clone().unwrap_or_else(|| "audio".to_string()))
            .mime_str(&mime_type)
            .map_err(|e| AiError::Config(format!("Invalid MIME type: {}", e)))?;

        let mut form = Form::new()
            .part("file", file)
            .text("model", prompt.model.clone());
        if let Some(language) = &prompt.language {
            form = form.text("language", language.clone());
        }
        form = if prompt.diarize {
            form.text("response_format", "diarized_json")
                .text("chunking_strategy", "auto")
        } else {
            form.text("response_format", "json")
        };

        let response = send_json(
            PROVIDER_NAME,
            self.request(context, Method::POST, "/audio/transcriptions")?
                .multipart(form),
        )
        .await?;
        Ok(parse_transcription(
            &response,
            Meta::new(&context.name, &prompt.model),
        ))
    }
}

fn parse_embeddings(response: &Value, meta: Meta) -> EmbeddingsResponse {
    let mut rows: Vec<(u64, Vec<f32>)> = response["data"]
        .as_array()
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(position, item)| {
            let index = item["index"].as_u64().unwrap_or(position as u64);
            let vector = item["embedding"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            (index, vector)
        })
        .collect();
    rows.sort_by_key(|(index, _)| *index);
    EmbeddingsResponse {
        embeddings: rows.into_iter().map(|(_, vector)| vector).collect(),
        tokens: response["usage"]["total_tokens"].as_u64().unwrap_or(0),
        meta,
    }
}

#[async_trait]
impl EmbeddingGateway for OpenAiGateway {
    async fn generate_embeddings(
        &self,
        context: &ProviderContext,
        prompt: &EmbeddingsPrompt,
    ) -> Result<EmbeddingsResponse> {
        let body = json!({
            "model": prompt.model,
            "input": prompt.inputs,
            "dimensions": prompt.dimensions,
        });
        let response = send_json(
            PROVIDER_NAME,
            self.request(context, Method::POST, "/embeddings")?.json(&body),
        )
        .await?;
        Ok(parse_embeddings(
            &response,
            Meta::new(&context.name, &prompt.model),
        ))
    }
}

fn mime_for_filename(filename: &str) -> Option<String> {
    let extension = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "json" => "application/json",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => return None,
    };
    Some(mime.to_string())
}

#[async_trait]
impl FileGateway for OpenAiGateway {
    async fn put_file(
        &self,
        context: &ProviderContext,
        file: &FileUpload,
    ) -> Result<StoredFileResponse> {
        let mut part = Part::bytes(file.content.clone())
            .file_name(file.name.clone().unwrap_or_else(|| "upload".to_string()));
        if let Some(mime_type) = &file.mime_type {
            part = part
                .mime_str(mime_type)
                .map_err(|e| AiError::Config(format!("Invalid MIME type: {}", e)))?;
        }
        let form = Form::new().text("purpose", "user_data").part("file", part);
        let response = send_json(
            PROVIDER_NAME,
            self.request(context, Method::POST, "/files")?.multipart(form),
        )
        .await?;
        Ok(StoredFileResponse {
            id: response["id"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn get_file(&self, context: &ProviderContext, file_id: &str) -> Result<FileResponse> {
        let metadata = send_json(
            PROVIDER_NAME,
            self.request(context, Method::GET, &format!("/files/{}", file_id))?,
        )
        .await?;
        let content = send_bytes(
            PROVIDER_NAME,
            self.request(context, Method::GET, &format!("/files/{}/content", file_id))?,
        )
        .await?;
        Ok(FileResponse {
            id: file_id.to_string(),
            content: Some(content),
            mime_type: metadata["filename"].as_str().and_then(mime_for_filename),
        })
    }

    async fn delete_file(&self, context: &ProviderContext, file_id: &str) -> Result<()> {
        send_json(
            PROVIDER_NAME,
            self.request(context, Method::DELETE, &format!("/files/{}", file_id))?,
        )
        .await?;
        Ok(())
    }
}

fn parse_store(store: &Value) -> StoreResponse {
    let counts = &store["file_counts"];
    StoreResponse {
        id: store["id"].as_str().unwrap_or_default().to_string(),
        name: store["name"].as_str().map(str::to_string),
        file_counts: StoreFileCounts {
            completed: counts["completed"].as_u64().unwrap_or(0),
            pending: counts["in_progress"].as_u64().unwrap_or(0),
            failed: counts["failed"].as_u64().unwrap_or(0),
        },
        ready: store["status"] == "completed",
    }
}

fn build_store_payload(request: &StoreRequest) -> Value {
    let mut body = json!({ "name": request.name });
    if let Some(description) = &request.description {
        body["description"] = json!(description);
    }
    if !request.file_ids.is_empty() {
        body["file_ids"] = json!(request.file_ids);
    }
    if let Some(days) = request.expires_after_days {
        body["expires_after"] = json!({ "anchor": "last_active_at", "days": days });
    }
    body
}

#[async_trait]
impl StoreGateway for OpenAiGateway {
    async fn create_store(
        &self,
        context: &ProviderContext,
        request: &StoreRequest,
    ) -> Result<StoreResponse> {
        let response = send_json(
            PROVIDER_NAME,
            self.request(context, Method::POST, "/vector_stores")?
                .json(&build_store_payload(request)),
        )
        .await?;
        Ok(parse_store(&response))
    }

    async fn get_store(&self, context: &ProviderContext, store_id: &str) -> Result<StoreResponse> {
        let response = send_json(
            PROVIDER_NAME,
            self.request(context, Method::GET, &format!("/vector_stores/{}", store_id))?,
        )
        .await?;
        Ok(parse_store(&response))
    }

    async fn delete_store(&self, context: &ProviderContext, store_id: &str) -> Result<bool> {
        let response = send_json(
            PROVIDER_NAME,
            self.request(context, Method::DELETE, &format!("/vector_stores/{}", store_id))?,
        )
        .await?;
        Ok(response["deleted"].as_bool().unwrap_or(false))
    }

    async fn add_file(
        &self,
        context: &ProviderContext,
        store_id: &str,
        file_id: &str,
    ) -> Result<()> {
        send_json(
            PROVIDER_NAME,
            self.request(
                context,
                Method::POST,
                &format!("/vector_stores/{}/files", store_id),
            )?
            .json(&json!({ "file_id": file_id })),
        )
        .await?;
        Ok(())
    }

    async fn remove_file(
        &self,
        context: &ProviderContext,
        store_id: &str,
        file_id: &str,
    ) -> Result<bool> {
        let response = send_json(
            PROVIDER_NAME,
            self.request(
                context,
                Method::DELETE,
                &format!("/vector_stores/{}/files/{}", store_id, file_id),
            )?,
        )
        .await?;
        Ok(response["deleted"].as_bool().unwrap_or(false))
    }
}
