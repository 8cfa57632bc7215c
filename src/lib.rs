//! Unified Rust gateway for multi-vendor generative AI.
//!
//! Uni-AI puts text generation, images, speech, transcription, embeddings,
//! reranking, provider files and vector stores behind one provider-agnostic
//! API, with ordered failover across providers, a single normalized
//! streaming event model, agent middleware, a queue for deferred work, and
//! test fakes for every capability.
//!
//! # Key concepts
//!
//! - **[`Ai`](ai::Ai)** is the entry point. It owns the provider registry, the
//!   event bus, the queue dispatcher and the embeddings cache.
//! - **Providers** are named entries in [`AiConfig`](api::AiConfig), each
//!   backed by a [`ProviderDriver`](traits::ProviderDriver) (`openai`,
//!   `anthropic`, `gemini`, `cohere`, `loopback`). They are built lazily on
//!   first use.
//! - **Gateways** such as [`TextGateway`](traits::TextGateway) and
//!   [`EmbeddingGateway`](traits::EmbeddingGateway) are the per-capability
//!   interfaces a driver implements.
//! - **Agents** ([`Agent`](agent::Agent)) bundle instructions, history,
//!   tools, an output schema and middleware.
//! - **Failover**: every operation takes an ordered list of provider/model
//!   pairs. Rate-limited pairs are skipped; any other error is returned.
//! - **Fakes**: [`FakeContext`](fake::FakeContext) swaps in scripted
//!   gateways and records what was asked of them.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use uni_ai::agent::agent;
//! use uni_ai::ai::Ai;
//! use uni_ai::api::{AiConfig, Capability, ProviderConfig};
//!
//! # async fn example() -> uni_ai::error::Result<()> {
//! let config = AiConfig::new()
//!     .provider("anthropic", ProviderConfig::new("anthropic"))
//!     .provider("openai", ProviderConfig::new("openai"))
//!     .default_for(Capability::Text, "anthropic");
//!
//! let ai = Ai::builder().config(config).build()?;
//!
//! // Falls back to OpenAI if Anthropic is rate limited.
//! let response = ai
//!     .agent(agent("You are a helpful assistant."))
//!     .provider(["anthropic", "openai"])
//!     .prompt("Summarize the borrow checker in one sentence.")
//!     .await?;
//! println!("{}", response.text);
//!
//! let vectors = ai
//!     .embeddings(["Hello, world!"])
//!     .provider("openai")
//!     .generate()
//!     .await?;
//! println!("{} dimensions", vectors.first().map_or(0, <[f32]>::len));
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod ai;
pub mod api;
pub mod cache;
pub mod data;
pub mod error;
pub mod events;
pub mod failover;
pub mod fake;
pub mod instrumentation;
pub mod middleware;
pub mod normalizer;
mod options_validation;
pub mod prompt;
pub mod provider;
pub mod queue;
pub mod registry;
pub mod response;
pub mod streaming;
pub mod tool;
pub mod traits;

pub use ai::{Ai, AiBuilder};
pub use error::{AiError, Result};
