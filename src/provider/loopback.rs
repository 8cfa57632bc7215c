use crate::api::ProviderDefaults;
use crate::data::{Meta, Usage};
use crate::error::Result;
use crate::prompt::TextRequest;
use crate::response::AgentResponse;
use crate::streaming::{EventStream, text_to_events};
use crate::traits::{ProviderContext, ProviderDriver, ProviderGateways, TextGateway};
use async_trait::async_trait;
use std::sync::Arc;

/// Default text model reported by the loopback provider.
pub const LOOPBACK_MODEL: &str = "loopback-text";

/// Offline text provider that answers every prompt with the prompt itself.
///
/// Useful for wiring up agents and middleware without network access.
/// Usage counts one token per whitespace-separated word in each direction.
///
/// ```json
/// { "providers": { "local": { "driver": "loopback" } } }
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackDriver;

impl ProviderDriver for LoopbackDriver {
    fn driver_id(&self) -> &str {
        "loopback"
    }

    fn defaults(&self) -> ProviderDefaults {
        ProviderDefaults {
            text: Some(LOOPBACK_MODEL.to_string()),
            ..ProviderDefaults::default()
        }
    }

    fn create(&self, _context: &ProviderContext) -> Result<ProviderGateways> {
        Ok(ProviderGateways {
            text: Some(Arc::new(LoopbackTextGateway)),
            ..ProviderGateways::default()
        })
    }
}

struct LoopbackTextGateway;

fn echo_usage(text: &str) -> Usage {
    let words = text.split_whitespace().count() as u64;
    Usage::new(words, words)
}

#[async_trait]
impl TextGateway for LoopbackTextGateway {
    async fn generate_text(
        &self,
        context: &ProviderContext,
        request: TextRequest,
    ) -> Result<AgentResponse> {
        let text = request.prompt.prompt.clone();
        Ok(AgentResponse::new(
            request.invocation_id.clone(),
            text.clone(),
            echo_usage(&text),
            Meta::new(&context.name, request.model()),
        ))
    }

    async fn stream_text(
        &self,
        context: &ProviderContext,
        request: TextRequest,
    ) -> Result<EventStream> {
        let text = &request.prompt.prompt;
        let events = text_to_events(
            &request.invocation_id,
            &context.name,
            request.model(),
            text,
            echo_usage(text),
        );
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::agent;
    use crate::prompt::AgentPrompt;
    use crate::streaming::TextDelta;
    use futures::TryStreamExt;

    fn request(text: &str) -> TextRequest {
        TextRequest::new(
            "inv-1",
            AgentPrompt::new(Arc::new(agent("Echo.")), text, vec![], "local", LOOPBACK_MODEL),
        )
    }

    #[tokio::test]
    async fn echoes_prompt_text() {
        let context = ProviderContext::new("local", "loopback");
        let response = LoopbackTextGateway
            .generate_text(&context, request("hello out there"))
            .await
            .unwrap();

        assert_eq!(response.text, "hello out there");
        assert_eq!(response.usage, Usage::new(3, 3));
        assert_eq!(response.meta.model.as_deref(), Some(LOOPBACK_MODEL));
    }

    #[tokio::test]
    async fn streams_one_delta_per_word() {
        let context = ProviderContext::new("local", "loopback");
        let stream = LoopbackTextGateway
            .stream_text(&context, request("hello out there"))
            .await
            .unwrap();
        let events: Vec<_> = stream.try_collect().await.unwrap();

        assert_eq!(events.len(), 7);
        assert_eq!(TextDelta::combine(&events), "hello out there");
    }

    #[test]
    fn only_text_is_supported() {
        let gateways = LoopbackDriver
            .create(&ProviderContext::new("local", "loopback"))
            .unwrap();
        assert_eq!(gateways.capabilities(), vec![crate::api::Capability::Text]);
    }
}
