//! Error types for the uni-ai gateway.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AiError>;

/// Unified error type covering configuration, resolution, vendor, tool, and
/// streaming failures.
///
/// Only [`Failoverable`](Self::Failoverable) is ever recovered from inside the
/// crate (by moving on to the next provider/model pair). Everything else
/// reaches the caller of the top-level operation untouched.
#[derive(Debug, Error)]
pub enum AiError {
    /// The vendor signaled a transient or rate-limit condition (HTTP 429).
    #[error("{message}")]
    Failoverable { provider: String, message: String },

    /// The resolved provider does not implement the requested capability.
    #[error("{0}")]
    CapabilityMismatch(String),

    /// No provider could be resolved, or the request parameters contradict
    /// each other.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A strict fake gateway received a call it has no response for.
    #[error("{0}")]
    StrayOperation(String),

    /// A non-429 HTTP failure reported by the vendor.
    #[error("{provider} API error ({status}): {message}")]
    Vendor {
        provider: String,
        status: u16,
        message: String,
    },

    /// Connection, body decoding, or SSE framing failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The vendor reported an error in the middle of a stream.
    #[error("Stream error: {0}")]
    Stream(String),

    /// A user-supplied tool failed. The source error is preserved as-is.
    #[error("Tool [{tool}] failed: {source}")]
    Tool {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AiError {
    /// Build the failoverable error a gateway raises for a rate-limited
    /// provider.
    pub fn rate_limited(provider: impl Into<String>) -> Self {
        let provider = provider.into();
        Self::Failoverable {
            message: format!("AI provider [{}] is rate limited.", provider),
            provider,
        }
    }

    /// Returns `true` only for [`Failoverable`](Self::Failoverable); the
    /// failover orchestrator moves on to the next pair for these and
    /// surfaces everything else.
    pub fn is_failoverable(&self) -> bool {
        matches!(self, Self::Failoverable { .. })
    }

    /// The HTTP status carried by a vendor error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Vendor { status, .. } => Some(*status),
            Self::Failoverable { .. } => Some(429),
            _ => None,
        }
    }
}
