//! Anthropic provider implementing the [`Provider`] trait.
//!
//! Builds streaming requests for the Messages API and adapts the SSE
//! response through [`AnthropicNormalizer`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::{Value, json};
use tracing::{debug, error, instrument};

use krait_core::messages::{AssistantBlock, Message};

use crate::error_parsing::{parse_api_error, parse_retry_after};
use crate::normalizer::RequestInfo;
use crate::provider::{
    Context, Provider, ProviderError, ProviderResult, ProviderStreamOptions, ProviderType,
    StreamEventStream,
};
use crate::stream_pipeline::normalize_body;

use super::stream_handler::AnthropicNormalizer;
use super::types::{
    API_VERSION, AnthropicConfig, AnthropicRequest, AnthropicTool, DEFAULT_BASE_URL,
    DEFAULT_MAX_OUTPUT_TOKENS,
};

/// Anthropic LLM provider.
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new provider.
    #[must_use]
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create a new provider with a shared HTTP client.
    #[must_use]
    pub fn with_client(config: AnthropicConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn build_headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let _ = headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        let _ = headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| ProviderError::Auth {
                message: format!("invalid API key header: {e}"),
            })?,
        );
        Ok(headers)
    }

    fn build_tools(context: &Context) -> Option<Vec<AnthropicTool>> {
        if context.tools.is_empty() {
            return None;
        }
        Some(
            context
                .tools
                .iter()
                .map(|t| AnthropicTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect(),
        )
    }

    fn build_request(&self, context: &Context, options: &ProviderStreamOptions) -> AnthropicRequest {
        let max_tokens = options
            .max_tokens
            .or(self.config.max_tokens)
            .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);
        let thinking = options.enable_thinking.then(|| {
            json!({
                "type": "enabled",
                "budget_tokens": max_tokens / 4,
            })
        });
        AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens,
            messages: convert_messages(&context.messages),
            system: context.system_prompt.clone(),
            tools: Self::build_tools(context),
            stream: true,
            thinking,
        }
    }
}

/// Convert canonical messages to the Messages API wire shape.
///
/// Tool results travel as `user` messages holding `tool_result` blocks.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message {
            Message::User { content } => json!({
                "role": "user",
                "content": [{"type": "text", "text": content}],
            }),
            Message::Assistant { blocks } => {
                let content: Vec<Value> = blocks
                    .iter()
                    .map(|block| match block {
                        AssistantBlock::Text { text } => json!({"type": "text", "text": text}),
                        AssistantBlock::Thinking { thinking } => {
                            json!({"type": "thinking", "thinking": thinking})
                        }
                        AssistantBlock::ToolCall { id, name, arguments } => json!({
                            "type": "tool_use",
                            "id": id,
                            "name": name,
                            "input": arguments,
                        }),
                    })
                    .collect();
                json!({"role": "assistant", "content": content})
            }
            Message::ToolResult {
                call_id,
                content,
                is_error,
            } => json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "content": content,
                    "is_error": is_error,
                }],
            }),
        })
        .collect()
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(provider = "anthropic", model = %self.config.model))]
    async fn stream(
        &self,
        context: &Context,
        options: &ProviderStreamOptions,
    ) -> ProviderResult<StreamEventStream> {
        let request = self.build_request(context, options);
        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{base_url}/v1/messages");
        let headers = self.build_headers()?;

        debug!(
            max_tokens = request.max_tokens,
            message_count = request.messages.len(),
            has_tools = request.tools.is_some(),
            "sending request"
        );

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(ProviderError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            let info = parse_api_error(&body, status.as_u16());
            error!(
                status = status.as_u16(),
                code = info.code.as_deref().unwrap_or("unknown"),
                retryable = info.retryable,
                "API error"
            );
            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited {
                    retry_after_ms: retry_after.unwrap_or(0),
                    message: info.message,
                });
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: info.message,
                code: info.code,
                retryable: info.retryable,
            });
        }

        let request_info = RequestInfo::new(&url, &self.config.model);
        Ok(normalize_body(
            AnthropicNormalizer,
            request_info,
            response.bytes_stream(),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
