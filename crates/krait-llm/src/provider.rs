//! The [`Provider`] trait and shared provider types.
//!
//! A provider owns one backend: it builds the wire request from a
//! [`Context`], performs the streaming HTTP call, and adapts the body
//! through its normalizer into a canonical event stream.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use krait_core::events::StreamEvent;
use krait_core::messages::Message;
use krait_core::tools::ToolDescriptor;
use serde::{Deserialize, Serialize};

/// Which backend family a provider speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Event-tagged SSE (Anthropic wire format).
    Anthropic,
    /// JSON-over-SSE chat completions (OpenAI wire format).
    OpenAi,
    /// Newline-delimited JSON (Ollama wire format).
    Ollama,
}

/// Request context for one streaming call.
#[derive(Clone, Debug, Default)]
pub struct Context {
    /// System prompt, if any.
    pub system_prompt: Option<String>,
    /// Conversation so far, including continuation tool results.
    pub messages: Vec<Message>,
    /// Registered tools offered to the model.
    pub tools: Vec<ToolDescriptor>,
}

/// Per-call stream options.
#[derive(Clone, Debug, Default)]
pub struct ProviderStreamOptions {
    /// Max output tokens override.
    pub max_tokens: Option<u32>,
    /// Enable thinking/reasoning output.
    pub enable_thinking: bool,
    /// Opaque continuation token from the previous `Complete` event.
    pub continuation_token: Option<String>,
}

/// Provider-level errors (pre-stream; mid-stream faults become
/// `StreamEvent::Error`).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transport failure issuing the request.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Credential problem.
    #[error("auth error: {message}")]
    Auth {
        /// Details.
        message: String,
    },

    /// Backend asked us to back off.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Suggested wait, 0 when the backend gave none.
        retry_after_ms: u64,
        /// Details.
        message: String,
    },

    /// Backend rejected the request.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Details.
        message: String,
        /// Backend error code, if present.
        code: Option<String>,
        /// Whether a retry is safe.
        retryable: bool,
    },
}

impl ProviderError {
    /// Whether retrying the whole request is safe.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } => true,
            Self::Api { retryable, .. } => *retryable,
            Self::Json(_) | Self::Auth { .. } => false,
        }
    }
}

/// Provider result alias.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Boxed canonical event stream.
pub type StreamEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// One interchangeable LLM backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend family.
    fn provider_type(&self) -> ProviderType;

    /// Model this provider is configured for.
    fn model(&self) -> &str;

    /// Issue the streaming request and return the canonical event stream.
    async fn stream(
        &self,
        context: &Context,
        options: &ProviderStreamOptions,
    ) -> ProviderResult<StreamEventStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_recoverable() {
        let err = ProviderError::RateLimited {
            retry_after_ms: 1000,
            message: "slow down".into(),
        };
        assert!(err.is_recoverable());
    }

    #[test]
    fn auth_is_not_recoverable() {
        let err = ProviderError::Auth {
            message: "bad key".into(),
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn api_error_uses_classified_flag() {
        let retryable = ProviderError::Api {
            status: 529,
            message: "overloaded".into(),
            code: Some("overloaded_error".into()),
            retryable: true,
        };
        let permanent = ProviderError::Api {
            status: 400,
            message: "bad request".into(),
            code: None,
            retryable: false,
        };
        assert!(retryable.is_recoverable());
        assert!(!permanent.is_recoverable());
    }
}
