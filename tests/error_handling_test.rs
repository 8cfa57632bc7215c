//! Tests for error variant display and propagation

use uni_ai::agent::agent;
use uni_ai::api::{AiConfig, Capability, ProviderConfig};
use uni_ai::error::AiError;
use uni_ai::Ai;
mod common;
use common::mock_support::{MockDriver, mock_ai};

#[test]
fn test_error_display_config() {
    let err = AiError::Config("invalid setting".to_string());
    assert_eq!(err.to_string(), "Configuration error: invalid setting");
}

#[test]
fn test_error_display_rate_limited() {
    let err = AiError::rate_limited("openai");
    assert_eq!(err.to_string(), "AI provider [openai] is rate limited.");
    assert!(err.is_failoverable());
    assert_eq!(err.status(), Some(429));
}

#[test]
fn test_error_display_vendor() {
    let err = AiError::Vendor {
        provider: "anthropic".to_string(),
        status: 529,
        message: "Overloaded".to_string(),
    };
    assert_eq!(err.to_string(), "anthropic API error (529): Overloaded");
    assert!(!err.is_failoverable());
    assert_eq!(err.status(), Some(529));
}

#[test]
fn test_error_display_transport_and_stream() {
    assert_eq!(
        AiError::Transport("connection reset".to_string()).to_string(),
        "Transport error: connection reset"
    );
    assert_eq!(
        AiError::Stream("overloaded_error".to_string()).to_string(),
        "Stream error: overloaded_error"
    );
}

#[test]
fn test_error_display_tool_keeps_source() {
    let err = AiError::Tool {
        tool: "lookup".to_string(),
        source: anyhow::anyhow!("no such order"),
    };
    assert_eq!(err.to_string(), "Tool [lookup] failed: no such order");
    assert!(std::error::Error::source(&err).is_some());
    assert_eq!(err.status(), None);
}

#[test]
fn test_serde_errors_convert() {
    let parse: Result<serde_json::Value, _> = serde_json::from_str("{");
    let err: AiError = parse.unwrap_err().into();
    assert!(err.to_string().starts_with("Serialization error:"));
}

#[tokio::test]
async fn test_missing_default_provider_reaches_the_caller() {
    let ai = Ai::builder()
        .config(AiConfig::new().provider("local", ProviderConfig::new("loopback")))
        .build()
        .unwrap();

    let err = ai.agent(agent("Hi.")).prompt("hello").await.unwrap_err();

    assert!(matches!(err, AiError::Config(_)));
    assert!(err.to_string().contains("No default provider"));
}

#[tokio::test]
async fn test_embedding_model_without_dimensions_is_rejected() {
    let driver = MockDriver::new();
    let ai = mock_ai(&driver, &["primary"]);

    let err = ai
        .embeddings(["a"])
        .model("custom-embed")
        .generate()
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::Config(_)));
    assert!(err.to_string().contains("dimensions must be given"));
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn test_capability_mismatch_names_the_provider() {
    let ai = Ai::builder()
        .config(
            AiConfig::new()
                .provider("edge", ProviderConfig::new("loopback"))
                .default_for(Capability::Audio, "edge"),
        )
        .build()
        .unwrap();

    let err = ai.audio("Hello").generate().await.unwrap_err();

    assert!(matches!(err, AiError::CapabilityMismatch(_)));
    assert!(err.to_string().contains("edge"));
}
