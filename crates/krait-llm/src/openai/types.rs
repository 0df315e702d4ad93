//! OpenAI configuration and wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default base URL for the OpenAI API.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Terminator record for chat-completion streams.
pub const DONE_SENTINEL: &str = "[DONE]";

/// OpenAI provider configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Model to request.
    pub model: String,
    /// API key.
    pub api_key: String,
    /// Base URL override (tests point this at a mock server).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Default max output tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Request body for the chat completions API.
#[derive(Debug, Serialize)]
pub struct OpenAiRequest {
    /// Model name.
    pub model: String,
    /// Converted conversation messages.
    pub messages: Vec<Value>,
    /// Tool definitions, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    /// Always true; this provider only streams.
    pub stream: bool,
    /// Asks the backend to append a usage-bearing chunk.
    pub stream_options: Value,
    /// Max output tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream wire format
// ─────────────────────────────────────────────────────────────────────────────

/// One `data:` chunk.
#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    /// Choice deltas (at most one choice in streaming mode).
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Usage, present only on the final chunk when requested.
    #[serde(default)]
    pub usage: Option<ChunkUsage>,
}

/// One choice delta.
#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    /// Incremental content.
    #[serde(default)]
    pub delta: ChunkDelta,
    /// Finish reason, present on the last content-bearing chunk.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Delta payload.
#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    /// Answer text fragment.
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning fragment (reasoning-capable models).
    #[serde(default)]
    pub reasoning_content: Option<String>,
    /// Tool-call fragments.
    #[serde(default)]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

/// One tool-call fragment. The `id` and function name arrive on the first
/// fragment for an index; later fragments carry only argument text.
#[derive(Debug, Deserialize)]
pub struct ChunkToolCall {
    /// Backend tool-call slot index.
    pub index: u64,
    /// Call ID (first fragment only, may be absent entirely).
    #[serde(default)]
    pub id: Option<String>,
    /// Function payload.
    #[serde(default)]
    pub function: Option<ChunkFunction>,
}

/// Function fragment.
#[derive(Debug, Default, Deserialize)]
pub struct ChunkFunction {
    /// Tool name (first fragment only).
    #[serde(default)]
    pub name: Option<String>,
    /// Argument JSON fragment.
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Usage as reported on the final chunk.
#[derive(Debug, Deserialize)]
pub struct ChunkUsage {
    /// Input tokens.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Output tokens.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Cache details.
    #[serde(default)]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

/// Prompt token breakdown.
#[derive(Debug, Deserialize)]
pub struct PromptTokensDetails {
    /// Tokens served from the prompt cache.
    #[serde(default)]
    pub cached_tokens: Option<u64>,
}
