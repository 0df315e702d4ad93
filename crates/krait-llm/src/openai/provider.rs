//! OpenAI provider implementing the [`Provider`] trait.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
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

use super::stream_handler::OpenAiNormalizer;
use super::types::{DEFAULT_BASE_URL, OpenAiConfig, OpenAiRequest};

/// OpenAI LLM provider.
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a new provider.
    #[must_use]
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create a new provider with a shared HTTP client.
    #[must_use]
    pub fn with_client(config: OpenAiConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn build_headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = format!("Bearer {}", self.config.api_key);
        let _ = headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|e| ProviderError::Auth {
                message: format!("invalid API key header: {e}"),
            })?,
        );
        Ok(headers)
    }

    fn build_tools(context: &Context) -> Option<Vec<Value>> {
        if context.tools.is_empty() {
            return None;
        }
        Some(
            context
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect(),
        )
    }

    fn build_request(&self, context: &Context, options: &ProviderStreamOptions) -> OpenAiRequest {
        OpenAiRequest {
            model: self.config.model.clone(),
            messages: convert_messages(context.system_prompt.as_deref(), &context.messages),
            tools: Self::build_tools(context),
            stream: true,
            stream_options: json!({"include_usage": true}),
            max_completion_tokens: options.max_tokens.or(self.config.max_tokens),
        }
    }
}

/// Convert canonical messages to the chat-completions wire shape.
///
/// Thinking blocks are not echoed back; tool results travel as `tool`
/// role messages keyed by call ID.
fn convert_messages(system_prompt: Option<&str>, messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::new();
    if let Some(system) = system_prompt {
        wire.push(json!({"role": "system", "content": system}));
    }
    for message in messages {
        match message {
            Message::User { content } => {
                wire.push(json!({"role": "user", "content": content}));
            }
            Message::Assistant { blocks } => {
                let text: String = blocks
                    .iter()
                    .filter_map(|b| match b {
                        AssistantBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                let tool_calls: Vec<Value> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        AssistantBlock::ToolCall { id, name, arguments } => Some(json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": serde_json::to_string(arguments)
                                    .unwrap_or_else(|_| "{}".into()),
                            },
                        })),
                        _ => None,
                    })
                    .collect();
                let mut msg = json!({"role": "assistant"});
                if !text.is_empty() {
                    msg["content"] = Value::String(text);
                }
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = Value::Array(tool_calls);
                }
                wire.push(msg);
            }
            Message::ToolResult {
                call_id, content, ..
            } => {
                let content = match content {
                    Value::String(s) => s.clone(),
                    other => serde_json::to_string(other).unwrap_or_default(),
                };
                wire.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": content,
                }));
            }
        }
    }
    wire
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAi
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(provider = "openai", model = %self.config.model))]
    async fn stream(
        &self,
        context: &Context,
        options: &ProviderStreamOptions,
    ) -> ProviderResult<StreamEventStream> {
        let request = self.build_request(context, options);
        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{base_url}/v1/chat/completions");
        let headers = self.build_headers()?;

        debug!(
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
            OpenAiNormalizer,
            request_info,
            response.bytes_stream(),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
