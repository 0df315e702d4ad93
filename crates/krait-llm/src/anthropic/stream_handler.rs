//! Anthropic tagged-SSE normalizer.
//!
//! Each SSE record carries a `type`-tagged JSON payload. Backend block
//! indices are not trusted: the shared [`BlockTracker`] re-assigns
//! canonical indices in first-seen order and keys tool builds by the
//! backend index.

use std::collections::HashSet;

use krait_core::events::{StreamEvent, TokenUsage};
use tracing::{info, warn};

use crate::blocks::BlockTracker;
use crate::normalizer::{RequestInfo, StreamNormalizer};
use crate::sse::{SseParser, SseRecord};
use crate::stop_reason::map_anthropic_stop_reason;
use crate::trace::StreamTrace;

use super::types::{AnthropicSseEvent, SseContentBlock, SseDelta};

/// Fold state for one Anthropic stream.
#[derive(Debug)]
pub struct AnthropicState {
    parser: SseParser,
    blocks: BlockTracker,
    trace: StreamTrace,
    /// Backend indices that opened as tool_use blocks.
    tool_indices: HashSet<u64>,
    input_tokens: u64,
    output_tokens: u64,
    cached_input_tokens: Option<u64>,
    cache_creation_tokens: Option<u64>,
    stop_reason: Option<String>,
    done: bool,
}

/// Normalizer for the Anthropic Messages SSE format.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnthropicNormalizer;

impl StreamNormalizer for AnthropicNormalizer {
    type State = AnthropicState;

    fn init(&self, request: &RequestInfo) -> AnthropicState {
        AnthropicState {
            parser: SseParser::new(),
            blocks: BlockTracker::new(),
            trace: StreamTrace::new(&request.url, &request.model),
            tool_indices: HashSet::new(),
            input_tokens: 0,
            output_tokens: 0,
            cached_input_tokens: None,
            cache_creation_tokens: None,
            stop_reason: None,
            done: false,
        }
    }

    fn process_chunk(
        &self,
        chunk: &[u8],
        mut state: AnthropicState,
    ) -> (Vec<StreamEvent>, AnthropicState) {
        let mut events = Vec::new();
        for record in state.parser.push(chunk) {
            events.extend(handle_record(&mut state, &record));
        }
        (events, state)
    }

    fn finalize(&self, mut state: AnthropicState) -> (Vec<StreamEvent>, AnthropicState) {
        let mut events = Vec::new();
        if let Some(record) = state.parser.finish() {
            events.extend(handle_record(&mut state, &record));
        }
        if !state.done {
            events.extend(state.blocks.finalize());
        }
        (events, state)
    }
}

/// Diagnostic trace accumulated so far (read after the stream ends).
impl AnthropicState {
    /// Borrow the trace.
    #[must_use]
    pub fn trace(&self) -> &StreamTrace {
        &self.trace
    }
}

fn handle_record(state: &mut AnthropicState, record: &SseRecord) -> Vec<StreamEvent> {
    if state.done || record.data.is_empty() {
        return Vec::new();
    }
    let event: AnthropicSseEvent = match serde_json::from_str(&record.data) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "unparseable SSE record, skipping");
            state.trace.note(format!("skipped unparseable record: {err}"));
            return Vec::new();
        }
    };

    match event {
        AnthropicSseEvent::MessageStart { message } => {
            state.input_tokens = message.usage.input_tokens;
            state.cached_input_tokens = message.usage.cache_read_input_tokens;
            state.cache_creation_tokens = message.usage.cache_creation_input_tokens;
            info!(
                input_tokens = state.input_tokens,
                cache_read = state.cached_input_tokens.unwrap_or(0),
                cache_write = state.cache_creation_tokens.unwrap_or(0),
                "message_start"
            );
            Vec::new()
        }

        AnthropicSseEvent::ContentBlockStart {
            index,
            content_block,
        } => match content_block {
            // Text/thinking blocks open lazily on their first delta.
            SseContentBlock::Text {} | SseContentBlock::Thinking {} => Vec::new(),
            SseContentBlock::ToolUse { id, name } => {
                let _ = state.tool_indices.insert(index);
                state
                    .blocks
                    .start_tool(index.to_string(), Some(id), name)
            }
            SseContentBlock::Unknown => {
                state.trace.note(format!("unknown block type at index {index}"));
                Vec::new()
            }
        },

        AnthropicSseEvent::ContentBlockDelta { index, delta } => match delta {
            SseDelta::TextDelta { text } => {
                state.trace.text.push_str(&text);
                state
                    .blocks
                    .content_delta(krait_core::events::ContentKind::Text, &text)
            }
            SseDelta::ThinkingDelta { thinking } => {
                state.trace.thinking.push_str(&thinking);
                state
                    .blocks
                    .content_delta(krait_core::events::ContentKind::Thinking, &thinking)
            }
            SseDelta::InputJsonDelta { partial_json } => {
                state.blocks.tool_fragment(&index.to_string(), &partial_json)
            }
            SseDelta::SignatureDelta { .. } | SseDelta::Unknown => Vec::new(),
        },

        AnthropicSseEvent::ContentBlockStop { index } => {
            if state.tool_indices.remove(&index) {
                let events = state.blocks.finish_tool(&index.to_string());
                record_tool_calls(&mut state.trace, &events);
                events
            } else {
                state.blocks.close_content()
            }
        }

        AnthropicSseEvent::MessageDelta { delta, usage } => {
            state.stop_reason = delta.stop_reason;
            if let Some(usage) = usage {
                state.output_tokens = usage.output_tokens;
            }
            Vec::new()
        }

        AnthropicSseEvent::MessageStop => {
            state.done = true;
            let mut events = state.blocks.finalize();
            record_tool_calls(&mut state.trace, &events);
            let stop_reason = state
                .blocks
                .resolve_stop_reason(map_anthropic_stop_reason(state.stop_reason.as_deref()));
            state.trace.note(format!("stop_reason={}", stop_reason.as_str()));
            events.push(StreamEvent::Complete {
                usage: TokenUsage {
                    input_tokens: state.input_tokens,
                    output_tokens: state.output_tokens,
                    cached_input_tokens: state.cached_input_tokens,
                    cache_creation_tokens: state.cache_creation_tokens,
                },
                stop_reason,
                continuation_token: None,
            });
            events
        }

        AnthropicSseEvent::Ping => Vec::new(),

        AnthropicSseEvent::Error { error } => {
            warn!(
                error_type = %error.error_type,
                message = %error.message,
                "mid-stream API error"
            );
            state.done = true;
            let recoverable = crate::error_parsing::retryable_code(&error.error_type);
            let mut events = state.blocks.finalize();
            events.push(StreamEvent::Error {
                reason: format!("{}: {}", error.error_type, error.message),
                recoverable,
            });
            events
        }

        AnthropicSseEvent::Unknown => {
            state.trace.note("skipped unknown record type".to_owned());
            Vec::new()
        }
    }
}

/// Mirror emitted tool calls into the diagnostic trace.
fn record_tool_calls(trace: &mut StreamTrace, events: &[StreamEvent]) {
    for event in events {
        if let StreamEvent::ToolCall { name, arguments, .. } = event {
            let args = serde_json::to_string(arguments).unwrap_or_else(|_| "{}".into());
            trace.tool_calls.push((name.clone(), args));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
