use crate::api::ProviderDefaults;
use crate::data::{Meta, RankedDocument};
use crate::error::{AiError, Result};
use crate::prompt::{EmbeddingsPrompt, RerankingPrompt};
use crate::provider::remote_common::{base_url, resolve_api_key, send_json};
use crate::response::{EmbeddingsResponse, RerankingResponse};
use crate::traits::{
    EmbeddingGateway, ProviderContext, ProviderDriver, ProviderGateways, RerankingGateway,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use std::sync::Arc;

const API_BASE: &str = "https://api.cohere.com/v2";
const API_KEY_ENV: &str = "CO_API_KEY";
const PROVIDER_NAME: &str = "Cohere";
const DEFAULT_INPUT_TYPE: &str = "search_document";

/// Driver for the Cohere v2 API: embeddings and reranking.
///
/// The `input_type` option is forwarded to the embed endpoint (default
/// `search_document`).
pub struct CohereDriver {
    client: Client,
}

impl CohereDriver {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for CohereDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderDriver for CohereDriver {
    fn driver_id(&self) -> &str {
        "cohere"
    }

    fn defaults(&self) -> ProviderDefaults {
        ProviderDefaults {
            embeddings: Some("embed-v4.0".to_string()),
            embedding_dimensions: Some(1536),
            reranking: Some("rerank-v3.5".to_string()),
            ..ProviderDefaults::default()
        }
    }

    fn create(&self, _context: &ProviderContext) -> Result<ProviderGateways> {
        let gateway = Arc::new(CohereGateway {
            client: self.client.clone(),
        });
        Ok(ProviderGateways {
            embeddings: Some(gateway.clone()),
            reranking: Some(gateway),
            ..ProviderGateways::default()
        })
    }
}

struct CohereGateway {
    client: Client,
}

impl CohereGateway {
    fn post(&self, context: &ProviderContext, path: &str) -> Result<RequestBuilder> {
        let api_key = resolve_api_key(context, API_KEY_ENV)?;
        Ok(self
            .client
            .post(format!("{}{}", base_url(context, API_BASE), path))
            .bearer_auth(api_key))
    }
}

fn build_embed_payload(context: &ProviderContext, prompt: &EmbeddingsPrompt) -> Value {
    json!({
        "model": prompt.model,
        "texts": prompt.inputs,
        "input_type": context.option_str("input_type").unwrap_or(DEFAULT_INPUT_TYPE),
        "embedding_types": ["float"],
        "output_dimension": prompt.dimensions,
    })
}

fn parse_embed_response(response: &Value, meta: Meta) -> Result<EmbeddingsResponse> {
    let rows = response["embeddings"]["float"]
        .as_array()
        .ok_or_else(|| AiError::Transport("Cohere: invalid embed response format".to_string()))?;
    let embeddings = rows
        .iter()
        .map(|row| {
            row.as_array()
                .into_iter()
                .flatten()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect()
        })
        .collect();
    Ok(EmbeddingsResponse {
        embeddings,
        tokens: response["meta"]["billed_units"]["input_tokens"]
            .as_u64()
            .unwrap_or(0),
        meta,
    })
}

fn build_rerank_payload(prompt: &RerankingPrompt) -> Value {
    let mut body = json!({
        "model": prompt.model,
        "query": prompt.query,
        "documents": prompt.documents,
    });
    if let Some(limit) = prompt.limit {
        body["top_n"] = json!(limit);
    }
    body
}

/// Results arrive most relevant first and refer back to the input by index.
fn parse_rerank_response(
    response: &Value,
    documents: &[String],
    meta: Meta,
) -> Result<RerankingResponse> {
    let rows = response["results"]
        .as_array()
        .ok_or_else(|| AiError::Transport("Cohere: invalid rerank response format".to_string()))?;
    let results = rows
        .iter()
        .filter_map(|row| {
            let index = row["index"].as_u64()? as usize;
            Some(RankedDocument {
                index,
                document: documents.get(index)?.clone(),
                score: row["relevance_score"].as_f64().unwrap_or(0.0),
            })
        })
        .collect();
    Ok(RerankingResponse { results, meta })
}

#[async_trait]
impl EmbeddingGateway for CohereGateway {
    async fn generate_embeddings(
        &self,
        context: &ProviderContext,
        prompt: &EmbeddingsPrompt,
    ) -> Result<EmbeddingsResponse> {
        let response = send_json(
            PROVIDER_NAME,
            self.post(context, "/embed")?
                .json(&build_embed_payload(context, prompt)),
        )
        .await?;
        parse_embed_response(&response, Meta::new(&context.name, &prompt.model))
    }
}

#[async_trait]
impl RerankingGateway for CohereGateway {
    async fn rerank(
        &self,
        context: &ProviderContext,
        prompt: &RerankingPrompt,
    ) -> Result<RerankingResponse> {
        let response = send_json(
            PROVIDER_NAME,
            self.post(context, "/rerank")?
                .json(&build_rerank_payload(prompt)),
        )
        .await?;
        parse_rerank_response(
            &response,
            &prompt.documents,
            Meta::new(&context.name, &prompt.model),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Capability;

    fn embeddings_prompt() -> EmbeddingsPrompt {
        EmbeddingsPrompt {
            inputs: vec!["first".into(), "second".into()],
            dimensions: 512,
            provider: "cohere".into(),
            model: "embed-v4.0".into(),
        }
    }

    #[test]
    fn embed_payload_uses_the_configured_input_type() {
        let context = ProviderContext {
            options: json!({ "input_type": "search_query" }),
            ..ProviderContext::new("cohere", "cohere")
        };
        let body = build_embed_payload(&context, &embeddings_prompt());
        assert_eq!(body["input_type"], "search_query");
        assert_eq!(body["output_dimension"], 512);

        let body = build_embed_payload(&ProviderContext::new("cohere", "cohere"), &embeddings_prompt());
        assert_eq!(body["input_type"], DEFAULT_INPUT_TYPE);
    }

    #[test]
    fn embed_responses_report_billed_tokens() {
        let parsed = parse_embed_response(
            &json!({
                "embeddings": { "float": [[0.1, 0.2], [0.3, 0.4]] },
                "meta": { "billed_units": { "input_tokens": 6 } }
            }),
            Meta::new("cohere", "embed-v4.0"),
        )
        .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.tokens, 6);
        assert!(parse_embed_response(&json!({}), Meta::default()).is_err());
    }

    #[test]
    fn rerank_limit_becomes_top_n() {
        let prompt = RerankingPrompt {
            query: "rust".into(),
            documents: vec!["a".into(), "b".into()],
            limit: Some(1),
            provider: "cohere".into(),
            model: "rerank-v3.5".into(),
        };
        assert_eq!(build_rerank_payload(&prompt)["top_n"], 1);
    }

    #[test]
    fn rerank_results_resolve_documents_by_index() {
        let documents = vec!["cats".to_string(), "rust ownership".to_string()];
        let parsed = parse_rerank_response(
            &json!({ "results": [
                { "index": 1, "relevance_score": 0.92 },
                { "index": 0, "relevance_score": 0.11 },
                { "index": 5, "relevance_score": 0.01 }
            ]}),
            &documents,
            Meta::new("cohere", "rerank-v3.5"),
        )
        .unwrap();
        assert_eq!(parsed.documents(), vec!["rust ownership", "cats"]);
        assert_eq!(parsed.results[0].index, 1);
    }

    #[test]
    fn supports_embeddings_and_reranking() {
        let gateways = CohereDriver::new()
            .create(&ProviderContext::new("cohere", "cohere"))
            .unwrap();
        assert_eq!(
            gateways.capabilities(),
            vec![Capability::Embeddings, Capability::Reranking]
        );
    }
}
