//! Configuration parsing and validation, including driver options

use serde_json::json;
use uni_ai::Ai;
use uni_ai::api::{AiConfig, Capability, ProviderConfig};
use uni_ai::error::AiError;

fn config_with_options(driver: &str, options: serde_json::Value) -> AiConfig {
    AiConfig::new().provider(
        "p",
        ProviderConfig {
            options,
            ..ProviderConfig::new(driver)
        },
    )
}

#[test]
fn test_full_config_parses_from_json() {
    let config = AiConfig::from_json(json!({
        "default": "openai",
        "default_for_embeddings": "cohere",
        "caching": { "embeddings": { "cache": true, "ttl_seconds": 60 } },
        "providers": {
            "openai": {
                "driver": "openai",
                "key_env": "OPENAI_API_KEY",
                "models": { "text": "gpt-5", "embedding_dimensions": 512 },
                "options": { "organization": "org-1" }
            },
            "cohere": { "driver": "cohere", "options": { "input_type": "search_query" } }
        }
    }))
    .unwrap();

    assert_eq!(config.default_provider(Capability::Text), Some("openai"));
    assert_eq!(config.default_provider(Capability::Embeddings), Some("cohere"));
    // Capabilities without their own key fall back to the general default.
    assert_eq!(config.default_provider(Capability::Image), Some("openai"));
    assert_eq!(config.default_provider(Capability::Stores), Some("openai"));
    assert!(config.caching.embeddings.cache);
    assert_eq!(config.providers["openai"].models.text.as_deref(), Some("gpt-5"));
}

#[test]
fn test_malformed_json_is_a_config_error() {
    let err = AiConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, AiError::Config(_)));
    assert!(err.to_string().contains("Invalid AI config JSON"));
}

#[test]
fn test_defaults_must_name_configured_providers() {
    let err = AiConfig::new()
        .provider("openai", ProviderConfig::new("openai"))
        .default_for(Capability::Reranking, "cohere")
        .validate()
        .unwrap_err();
    assert!(err.to_string().contains("'default_for_reranking' names unknown provider 'cohere'"));
}

#[test]
fn test_providers_must_declare_a_driver() {
    let err = AiConfig::new()
        .provider("nameless", ProviderConfig::default())
        .validate()
        .unwrap_err();
    assert!(err.to_string().contains("must declare a driver"));
}

#[test]
fn test_zero_embedding_dimensions_are_rejected() {
    let mut provider = ProviderConfig::new("openai");
    provider.models.embedding_dimensions = Some(0);
    let err = AiConfig::new().provider("openai", provider).validate().unwrap_err();
    assert!(err.to_string().contains("embedding dimensions must be greater than 0"));
}

#[test]
fn test_zero_cache_ttl_is_rejected() {
    let mut config = AiConfig::new();
    config.caching.embeddings.ttl_seconds = Some(0);
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("TTL must be greater than 0"));
}

#[test]
fn test_openai_options() {
    assert!(
        config_with_options("openai", json!({ "organization": "org", "project": "proj" }))
            .validate()
            .is_ok()
    );
    let err = config_with_options("openai", json!({ "deployment": "x" }))
        .validate()
        .unwrap_err();
    assert!(err.to_string().contains("Unknown option 'deployment' for driver 'openai'"));
}

#[test]
fn test_anthropic_options() {
    assert!(
        config_with_options(
            "anthropic",
            json!({ "anthropic_version": "2023-06-01", "max_tokens": 2048 })
        )
        .validate()
        .is_ok()
    );
    let err = config_with_options("anthropic", json!({ "max_tokens": 0 }))
        .validate()
        .unwrap_err();
    assert!(err.to_string().contains("must be greater than 0"));
    let err = config_with_options("anthropic", json!({ "anthropic_version": 2023 }))
        .validate()
        .unwrap_err();
    assert!(err.to_string().contains("must be a string"));
}

#[test]
fn test_gemini_options() {
    assert!(
        config_with_options("gemini", json!({ "api_version": "v1" }))
            .validate()
            .is_ok()
    );
    let err = config_with_options("gemini", json!({ "region": "us" }))
        .validate()
        .unwrap_err();
    assert!(err.to_string().contains("Unknown option 'region'"));
}

#[test]
fn test_cohere_options() {
    assert!(
        config_with_options("cohere", json!({ "input_type": "classification" }))
            .validate()
            .is_ok()
    );
    let err = config_with_options("cohere", json!("search_query"))
        .validate()
        .unwrap_err();
    assert!(err.to_string().contains("must be a JSON object or null"));
}

#[test]
fn test_loopback_takes_no_options() {
    assert!(config_with_options("loopback", json!({})).validate().is_ok());
    assert!(
        config_with_options("loopback", json!({ "anything": true }))
            .validate()
            .is_err()
    );
}

#[test]
fn test_custom_drivers_accept_any_options() {
    assert!(
        config_with_options("in-house", json!({ "whatever": [1, 2, 3] }))
            .validate()
            .is_ok()
    );
}

#[test]
fn test_builder_rejects_unregistered_drivers() {
    let err = Ai::builder()
        .config(AiConfig::new().provider("p", ProviderConfig::new("in-house")))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("Unsupported driver [in-house] for provider [p]"));
}

#[test]
fn test_config_is_read_from_file() {
    let path = std::env::temp_dir().join(format!("uni-ai-config-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{ "default": "local", "providers": { "local": { "driver": "loopback" } } }"#,
    )
    .unwrap();

    let config = AiConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.default_provider(Capability::Text), Some("local"));
    let err = AiConfig::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to read AI config file"));
}
