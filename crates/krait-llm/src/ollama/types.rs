//! Ollama configuration and wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default base URL for a local Ollama daemon.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama provider configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Model to request.
    pub model: String,
    /// Base URL override (tests point this at a mock server).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Default max output tokens (`num_predict`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Request body for the chat API.
#[derive(Debug, Serialize)]
pub struct OllamaRequest {
    /// Model name.
    pub model: String,
    /// Converted conversation messages.
    pub messages: Vec<Value>,
    /// Tool definitions, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    /// Always true; this provider only streams.
    pub stream: bool,
    /// Enable thinking output.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub think: bool,
    /// Generation options (`num_predict` for the token cap).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream wire format
// ─────────────────────────────────────────────────────────────────────────────

/// One NDJSON line.
#[derive(Debug, Deserialize)]
pub struct OllamaChunk {
    /// Message fragment, absent on the final accounting line.
    #[serde(default)]
    pub message: Option<OllamaMessage>,
    /// Whether this is the final line.
    #[serde(default)]
    pub done: bool,
    /// Stop reason on the final line.
    #[serde(default)]
    pub done_reason: Option<String>,
    /// Output tokens (final line).
    #[serde(default)]
    pub eval_count: Option<u64>,
    /// Input tokens (final line).
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
}

/// Message fragment.
#[derive(Debug, Deserialize)]
pub struct OllamaMessage {
    /// Answer text fragment.
    #[serde(default)]
    pub content: Option<String>,
    /// Thinking fragment.
    #[serde(default)]
    pub thinking: Option<String>,
    /// Complete tool calls.
    #[serde(default)]
    pub tool_calls: Option<Vec<OllamaToolCall>>,
}

/// One complete tool call.
#[derive(Debug, Deserialize)]
pub struct OllamaToolCall {
    /// Function payload.
    pub function: OllamaFunction,
}

/// Function payload with already-parsed arguments.
#[derive(Debug, Deserialize)]
pub struct OllamaFunction {
    /// Tool name.
    pub name: String,
    /// Parsed arguments.
    #[serde(default)]
    pub arguments: serde_json::Map<String, Value>,
}
