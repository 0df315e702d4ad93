//! # Stop Reason Mapping
//!
//! Maps backend-specific stop/finish reasons to canonical [`StopReason`]
//! values. Each backend uses different strings for the same concepts.
//! Tool-use forcing (a stream that emitted tool calls always completes
//! with `ToolUse`) is applied afterwards by the block tracker.

use krait_core::events::StopReason;

/// Map an Anthropic-family stop reason.
///
/// - `"end_turn"` / `"stop_sequence"` -> normal completion
/// - `"tool_use"` -> model wants to call tools
/// - `"max_tokens"` -> output limit reached
#[must_use]
pub fn map_anthropic_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

/// Map an OpenAI-family finish reason.
///
/// - `"stop"` -> normal completion
/// - `"length"` -> max tokens reached
/// - `"tool_calls"` -> model wants to call tools
/// - `"content_filter"` -> blocked by safety filter
/// - `null` -> default to `end_turn`
#[must_use]
pub fn map_openai_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

/// Map an Ollama done reason.
///
/// - `"stop"` -> normal completion
/// - `"length"` -> max tokens reached
/// - `null` -> default to `end_turn`
#[must_use]
pub fn map_ollama_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("length") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
