//! Ollama provider implementing the [`Provider`] trait.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, error, instrument};

use krait_core::messages::{AssistantBlock, Message};

use crate::error_parsing::parse_api_error;
use crate::normalizer::RequestInfo;
use crate::provider::{
    Context, Provider, ProviderError, ProviderResult, ProviderStreamOptions, ProviderType,
    StreamEventStream,
};
use crate::stream_pipeline::normalize_body;

use super::stream_handler::OllamaNormalizer;
use super::types::{DEFAULT_BASE_URL, OllamaConfig, OllamaRequest};

/// Ollama LLM provider. No authentication; the daemon is local.
pub struct OllamaProvider {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a new provider.
    #[must_use]
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create a new provider with a shared HTTP client.
    #[must_use]
    pub fn with_client(config: OllamaConfig, client: reqwest::Client) -> Self {
        Self { config, client }
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

    fn build_request(&self, context: &Context, options: &ProviderStreamOptions) -> OllamaRequest {
        let num_predict = options.max_tokens.or(self.config.max_tokens);
        OllamaRequest {
            model: self.config.model.clone(),
            messages: convert_messages(context.system_prompt.as_deref(), &context.messages),
            tools: Self::build_tools(context),
            stream: true,
            think: options.enable_thinking,
            options: num_predict.map(|n| json!({"num_predict": n})),
        }
    }
}

/// Convert canonical messages to the Ollama chat wire shape.
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
                        AssistantBlock::ToolCall { name, arguments, .. } => Some(json!({
                            "function": {"name": name, "arguments": arguments},
                        })),
                        _ => None,
                    })
                    .collect();
                let mut msg = json!({"role": "assistant", "content": text});
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = Value::Array(tool_calls);
                }
                wire.push(msg);
            }
            Message::ToolResult { content, .. } => {
                let content = match content {
                    Value::String(s) => s.clone(),
                    other => serde_json::to_string(other).unwrap_or_default(),
                };
                wire.push(json!({"role": "tool", "content": content}));
            }
        }
    }
    wire
}

#[async_trait]
impl Provider for OllamaProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Ollama
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(provider = "ollama", model = %self.config.model))]
    async fn stream(
        &self,
        context: &Context,
        options: &ProviderStreamOptions,
    ) -> ProviderResult<StreamEventStream> {
        let request = self.build_request(context, options);
        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{base_url}/api/chat");

        debug!(
            message_count = request.messages.len(),
            has_tools = request.tools.is_some(),
            "sending request"
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(ProviderError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let info = parse_api_error(&body, status.as_u16());
            error!(
                status = status.as_u16(),
                retryable = info.retryable,
                "API error"
            );
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: info.message,
                code: info.code,
                retryable: info.retryable,
            });
        }

        let request_info = RequestInfo::new(&url, &self.config.model);
        Ok(normalize_body(
            OllamaNormalizer,
            request_info,
            response.bytes_stream(),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
