//! Public API types for configuring providers and describing failover order.

use crate::error::{AiError, Result};
use crate::options_validation::validate_provider_options;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A generation or management capability a provider may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Image,
    Audio,
    Transcription,
    Embeddings,
    Reranking,
    Files,
    Stores,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Self::Text,
        Self::Image,
        Self::Audio,
        Self::Transcription,
        Self::Embeddings,
        Self::Reranking,
        Self::Files,
        Self::Stores,
    ];

    /// Human-readable description used in capability errors.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Text => "text generation",
            Self::Image => "image generation",
            Self::Audio => "audio generation",
            Self::Transcription => "transcription generation",
            Self::Embeddings => "embedding generation",
            Self::Reranking => "reranking",
            Self::Files => "file management",
            Self::Stores => "vector stores",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Transcription => "transcription",
            Self::Embeddings => "embeddings",
            Self::Reranking => "reranking",
            Self::Files => "files",
            Self::Stores => "stores",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a failover list: a provider name and an optional model.
///
/// A `None` model means "use the provider's default for the capability".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderModel {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Ordered provider/model pairs. The order is the failover order and is
/// kept exactly as given, duplicates included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderModelList(Vec<ProviderModel>);

impl ProviderModelList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair.
    pub fn push(mut self, provider: impl Into<String>, model: Option<String>) -> Self {
        self.0.push(ProviderModel {
            provider: provider.into(),
            model,
        });
        self
    }

    /// A single provider, optionally pinned to a model.
    pub fn single(provider: impl Into<String>, model: Option<String>) -> Self {
        Self::new().push(provider, model)
    }

    /// Fill in `model` for a lone provider given without one.
    ///
    /// A provider named on its own plus a separate model means that pair;
    /// explicit multi-entry lists already say what they mean and are left
    /// untouched.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let ([entry], Some(model)) = (self.0.as_mut_slice(), model)
            && entry.model.is_none()
        {
            entry.model = Some(model);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProviderModel> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<&ProviderModel> {
        self.0.first()
    }
}

impl<'a> IntoIterator for &'a ProviderModelList {
    type Item = &'a ProviderModel;
    type IntoIter = std::slice::Iter<'a, ProviderModel>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<&str> for ProviderModelList {
    fn from(provider: &str) -> Self {
        Self::single(provider, None)
    }
}

impl From<String> for ProviderModelList {
    fn from(provider: String) -> Self {
        Self::single(provider, None)
    }
}

impl From<(&str, &str)> for ProviderModelList {
    fn from((provider, model): (&str, &str)) -> Self {
        Self::single(provider, Some(model.to_string()))
    }
}

impl From<Vec<&str>> for ProviderModelList {
    fn from(providers: Vec<&str>) -> Self {
        providers
            .into_iter()
            .fold(Self::new(), |list, p| list.push(p, None))
    }
}

impl<const N: usize> From<[&str; N]> for ProviderModelList {
    fn from(providers: [&str; N]) -> Self {
        Self::from(providers.to_vec())
    }
}

impl From<Vec<(&str, &str)>> for ProviderModelList {
    fn from(pairs: Vec<(&str, &str)>) -> Self {
        pairs
            .into_iter()
            .fold(Self::new(), |list, (p, m)| list.push(p, Some(m.to_string())))
    }
}

impl<const N: usize> From<[(&str, &str); N]> for ProviderModelList {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self::from(pairs.to_vec())
    }
}

impl From<Vec<(&str, Option<&str>)>> for ProviderModelList {
    fn from(pairs: Vec<(&str, Option<&str>)>) -> Self {
        pairs.into_iter().fold(Self::new(), |list, (p, m)| {
            list.push(p, m.map(str::to_string))
        })
    }
}

/// Per-capability default models of a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dimensions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reranking: Option<String>,
}

impl ProviderDefaults {
    /// The default model for `capability`. File and store management have no
    /// model, so they resolve to an empty string.
    pub fn model_for(&self, capability: Capability) -> Option<&str> {
        match capability {
            Capability::Text => self.text.as_deref(),
            Capability::Image => self.image.as_deref(),
            Capability::Audio => self.audio.as_deref(),
            Capability::Transcription => self.transcription.as_deref(),
            Capability::Embeddings => self.embeddings.as_deref(),
            Capability::Reranking => self.reranking.as_deref(),
            Capability::Files | Capability::Stores => Some(""),
        }
    }

    /// Overlay `overrides` on top of `self`.
    pub fn merged(mut self, overrides: &ProviderDefaults) -> Self {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if overrides.$field.is_some() {
                    self.$field = overrides.$field.clone();
                })*
            };
        }
        overlay!(
            text,
            image,
            audio,
            transcription,
            embeddings,
            embedding_dimensions,
            reranking
        );
        self
    }
}

/// Configuration of one named provider.
///
/// # Example JSON
///
/// ```json
/// {
///   "driver": "openai",
///   "key_env": "OPENAI_API_KEY",
///   "models": { "text": "gpt-5-mini" }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Driver that implements this provider (e.g. `"openai"`, `"loopback"`).
    pub driver: String,
    /// Inline API key. Takes precedence over `key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Environment variable holding the API key. Defaults to the driver's
    /// conventional variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_env: Option<String>,
    /// Base URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Per-capability default model overrides.
    #[serde(default)]
    pub models: ProviderDefaults,
    /// Driver-specific options. Defaults to `{}`.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl ProviderConfig {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Embeddings cache settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingsCacheConfig {
    /// Cache embeddings unless a request opts out.
    #[serde(default)]
    pub cache: bool,
    /// Entry lifetime. Defaults to thirty days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachingConfig {
    #[serde(default)]
    pub embeddings: EmbeddingsCacheConfig,
}

/// Top-level gateway configuration.
///
/// # Example JSON
///
/// ```json
/// {
///   "default": "openai",
///   "default_for_reranking": "cohere",
///   "providers": {
///     "openai": { "driver": "openai" },
///     "cohere": { "driver": "cohere", "key_env": "CO_API_KEY" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    /// Default provider for text generation (agents).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_for_images: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_for_audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_for_transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_for_embeddings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_for_reranking: Option<String>,
    #[serde(default)]
    pub caching: CachingConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl AiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a named provider.
    pub fn provider(mut self, name: impl Into<String>, config: ProviderConfig) -> Self {
        self.providers.insert(name.into(), config);
        self
    }

    /// Set the default provider for a capability.
    pub fn default_for(mut self, capability: Capability, provider: impl Into<String>) -> Self {
        let provider = Some(provider.into());
        match capability {
            Capability::Text => self.default = provider,
            Capability::Image => self.default_for_images = provider,
            Capability::Audio => self.default_for_audio = provider,
            Capability::Transcription => self.default_for_transcription = provider,
            Capability::Embeddings => self.default_for_embeddings = provider,
            Capability::Reranking => self.default_for_reranking = provider,
            // Files and stores follow the general default.
            Capability::Files | Capability::Stores => self.default = provider,
        }
        self
    }

    /// The configured default provider for `capability`.
    ///
    /// Capabilities without a dedicated key (files, stores) and unset
    /// dedicated keys fall back to `default`.
    pub fn default_provider(&self, capability: Capability) -> Option<&str> {
        let specific = match capability {
            Capability::Text | Capability::Files | Capability::Stores => None,
            Capability::Image => self.default_for_images.as_deref(),
            Capability::Audio => self.default_for_audio.as_deref(),
            Capability::Transcription => self.default_for_transcription.as_deref(),
            Capability::Embeddings => self.default_for_embeddings.as_deref(),
            Capability::Reranking => self.default_for_reranking.as_deref(),
        };
        specific.or(self.default.as_deref())
    }

    /// Validate invariants: defaults must name configured providers, drivers
    /// must be non-empty, and driver options must be well formed.
    pub fn validate(&self) -> Result<()> {
        for (name, provider) in &self.providers {
            if name.is_empty() {
                return Err(AiError::Config("Provider name cannot be empty".to_string()));
            }
            if provider.driver.is_empty() {
                return Err(AiError::Config(format!(
                    "Provider '{}' must declare a driver",
                    name
                )));
            }
            if provider.models.embedding_dimensions == Some(0) {
                return Err(AiError::Config(format!(
                    "Provider '{}' embedding dimensions must be greater than 0",
                    name
                )));
            }
            validate_provider_options(&provider.driver, &provider.options)?;
        }

        let defaults = [
            ("default", &self.default),
            ("default_for_images", &self.default_for_images),
            ("default_for_audio", &self.default_for_audio),
            ("default_for_transcription", &self.default_for_transcription),
            ("default_for_embeddings", &self.default_for_embeddings),
            ("default_for_reranking", &self.default_for_reranking),
        ];
        for (key, value) in defaults {
            if let Some(provider) = value
                && !self.providers.contains_key(provider)
            {
                return Err(AiError::Config(format!(
                    "'{}' names unknown provider '{}'",
                    key, provider
                )));
            }
        }

        if self.caching.embeddings.ttl_seconds == Some(0) {
            return Err(AiError::Config(
                "Embeddings cache TTL must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a configuration from a JSON value.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| AiError::Config(format!("Invalid AI config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| AiError::Config(format!("Invalid AI config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AiError::Config(format!(
                "Failed to read AI config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&contents)
    }
}

/// Recursively hash a JSON value in a deterministic, key-order-independent way.
///
/// Each JSON variant is prefixed with a unique discriminant byte to avoid
/// collisions between structurally different values (e.g. `null` vs `false`).
pub(crate) fn hash_json_value<H: std::hash::Hasher>(value: &serde_json::Value, hasher: &mut H) {
    use std::hash::Hash;

    match value {
        serde_json::Value::Null => {
            0u8.hash(hasher);
        }
        serde_json::Value::Bool(v) => {
            1u8.hash(hasher);
            v.hash(hasher);
        }
        serde_json::Value::Number(v) => {
            2u8.hash(hasher);
            v.to_string().hash(hasher);
        }
        serde_json::Value::String(v) => {
            3u8.hash(hasher);
            v.hash(hasher);
        }
        serde_json::Value::Array(values) => {
            4u8.hash(hasher);
            values.len().hash(hasher);
            for v in values {
                hash_json_value(v, hasher);
            }
        }
        serde_json::Value::Object(map) => {
            5u8.hash(hasher);
            map.len().hash(hasher);

            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by_key(|(k, _)| *k);
            for (k, v) in entries {
                k.hash(hasher);
                hash_json_value(v, hasher);
            }
        }
    }
}
