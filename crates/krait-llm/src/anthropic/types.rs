//! Anthropic configuration and wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default base URL for the Anthropic API.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version header value.
pub const API_VERSION: &str = "2023-06-01";

/// Default `max_tokens` when neither the config nor the call sets one.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

/// Anthropic provider configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnthropicConfig {
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

// ─────────────────────────────────────────────────────────────────────────────
// Request wire format
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for the Messages API.
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    /// Model name.
    pub model: String,
    /// Max output tokens.
    pub max_tokens: u32,
    /// Converted conversation messages.
    pub messages: Vec<Value>,
    /// System prompt, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Tool definitions, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    /// Always true; this provider only streams.
    pub stream: bool,
    /// Thinking configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Value>,
}

/// A tool definition in Anthropic format.
#[derive(Debug, Serialize)]
pub struct AnthropicTool {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema for the arguments.
    pub input_schema: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE wire format
// ─────────────────────────────────────────────────────────────────────────────

/// One tagged SSE record's data payload.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicSseEvent {
    /// Message opened; carries input-side usage.
    MessageStart {
        /// Message envelope.
        message: SseMessageStart,
    },
    /// A content block opened at a backend index.
    ContentBlockStart {
        /// Backend block index.
        index: u64,
        /// Block payload.
        content_block: SseContentBlock,
    },
    /// Incremental content for a backend block.
    ContentBlockDelta {
        /// Backend block index.
        index: u64,
        /// Delta payload.
        delta: SseDelta,
    },
    /// A backend block closed.
    ContentBlockStop {
        /// Backend block index.
        index: u64,
    },
    /// Stop reason and output-side usage.
    MessageDelta {
        /// Delta envelope.
        delta: SseMessageDelta,
        /// Output usage, if reported.
        usage: Option<SseUsage>,
    },
    /// Message finished.
    MessageStop,
    /// Keep-alive.
    Ping,
    /// Mid-stream error.
    Error {
        /// Error payload.
        error: SseError,
    },
    /// Forward compatibility: unrecognized record types are skipped.
    #[serde(other)]
    Unknown,
}

/// `message_start` envelope.
#[derive(Debug, Deserialize)]
pub struct SseMessageStart {
    /// Input-side usage.
    #[serde(default)]
    pub usage: SseUsage,
}

/// Usage fields as they appear on the wire.
#[derive(Debug, Default, Deserialize)]
pub struct SseUsage {
    /// Input tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens.
    #[serde(default)]
    pub output_tokens: u64,
    /// Tokens read from the prompt cache.
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
    /// Tokens written to the prompt cache.
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
}

/// `content_block_start` payload variants.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseContentBlock {
    /// Answer text block.
    Text {},
    /// Thinking block.
    Thinking {},
    /// Tool call block.
    ToolUse {
        /// Backend-supplied call ID.
        id: String,
        /// Tool name.
        name: String,
    },
    /// Unrecognized block types are tracked but produce no events.
    #[serde(other)]
    Unknown,
}

/// `content_block_delta` payload variants.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseDelta {
    /// Answer text fragment.
    TextDelta {
        /// Fragment.
        text: String,
    },
    /// Thinking fragment.
    ThinkingDelta {
        /// Fragment.
        thinking: String,
    },
    /// Tool argument JSON fragment.
    InputJsonDelta {
        /// Raw fragment.
        partial_json: String,
    },
    /// Thinking signature fragment (not surfaced).
    SignatureDelta {
        /// Fragment.
        signature: String,
    },
    /// Unrecognized delta types are skipped.
    #[serde(other)]
    Unknown,
}

/// `message_delta` envelope.
#[derive(Debug, Deserialize)]
pub struct SseMessageDelta {
    /// Backend stop reason.
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Mid-stream error payload.
#[derive(Debug, Deserialize)]
pub struct SseError {
    /// Backend error type.
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}
