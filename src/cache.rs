//! Embeddings response cache.
//!
//! When `caching.embeddings.cache` is enabled, generated embeddings are
//! stored under a key derived from the driver, model, dimensions and inputs,
//! so repeating the same request against the same driver skips the vendor.
//!
//! Entries expire after `caching.embeddings.ttl_seconds`
//! ([`DEFAULT_TTL_SECONDS`] when unset). Cache hits report zero tokens.

use crate::data::Meta;
use crate::response::EmbeddingsResponse;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::hash::Hasher;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Thirty days.
pub const DEFAULT_TTL_SECONDS: u64 = 60 * 60 * 24 * 30;

const KEY_PREFIX: &str = "uni-ai-embeddings";

/// Cache key for one embeddings request.
///
/// The driver rather than the provider name is used, so two providers backed
/// by the same vendor share entries.
pub fn embeddings_cache_key(driver: &str, model: &str, dimensions: u32, inputs: &[String]) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    crate::api::hash_json_value(
        &json!([driver, model, dimensions, inputs]),
        &mut hasher,
    );
    format!("{}:{:016x}", KEY_PREFIX, hasher.finish())
}

/// Storage behind the embeddings cache.
#[async_trait]
pub trait EmbeddingsCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<EmbeddingsResponse>;

    async fn put(&self, key: &str, response: &EmbeddingsResponse, ttl: Duration);
}

struct Entry {
    embeddings: Vec<Vec<f32>>,
    meta: Meta,
    expires_at: Instant,
}

/// Process-local cache with per-entry expiry.
#[derive(Default)]
pub struct InMemoryEmbeddingsCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryEmbeddingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired ones included until they are next read.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[async_trait]
impl EmbeddingsCache for InMemoryEmbeddingsCache {
    async fn get(&self, key: &str) -> Option<EmbeddingsResponse> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                tracing::debug!(key, "Embeddings cache hit");
                Some(EmbeddingsResponse {
                    embeddings: entry.embeddings.clone(),
                    tokens: 0,
                    meta: entry.meta.clone(),
                })
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &str, response: &EmbeddingsResponse, ttl: Duration) {
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                embeddings: response.embeddings.clone(),
                meta: response.meta.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> EmbeddingsResponse {
        EmbeddingsResponse {
            embeddings: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
            tokens: 12,
            meta: Meta::new("openai", "text-embedding-3-small"),
        }
    }

    #[test]
    fn keys_depend_on_every_part() {
        let inputs = vec!["a".to_string(), "b".to_string()];
        let base = embeddings_cache_key("openai", "small", 256, &inputs);

        assert_eq!(base, embeddings_cache_key("openai", "small", 256, &inputs));
        assert!(base.starts_with("uni-ai-embeddings:"));
        assert_ne!(base, embeddings_cache_key("gemini", "small", 256, &inputs));
        assert_ne!(base, embeddings_cache_key("openai", "large", 256, &inputs));
        assert_ne!(base, embeddings_cache_key("openai", "small", 512, &inputs));
        assert_ne!(
            base,
            embeddings_cache_key("openai", "small", 256, &["a-b".to_string()])
        );
    }

    #[tokio::test]
    async fn hits_report_zero_tokens() {
        let cache = InMemoryEmbeddingsCache::new();
        cache.put("k", &response(), Duration::from_secs(60)).await;

        let hit = cache.get("k").await.unwrap();
        assert_eq!(hit.embeddings, response().embeddings);
        assert_eq!(hit.tokens, 0);
        assert_eq!(hit.meta.provider.as_deref(), Some("openai"));
        assert!(cache.get("other").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_on_read() {
        let cache = InMemoryEmbeddingsCache::new();
        cache.put("k", &response(), Duration::ZERO).await;

        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty().await);
    }
}
