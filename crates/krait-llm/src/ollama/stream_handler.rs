//! Ollama NDJSON normalizer.
//!
//! Each complete line is one JSON object carrying message fragments;
//! the final line has `done: true` and the token accounting. Tool calls
//! arrive whole (parsed arguments, no call ID) so they map straight to
//! a one-shot tool block with a generated ID.

use krait_core::events::{ContentKind, StreamEvent, TokenUsage};
use tracing::warn;

use crate::blocks::BlockTracker;
use crate::normalizer::{RequestInfo, StreamNormalizer};
use crate::sse::LineBuffer;
use crate::stop_reason::map_ollama_stop_reason;
use crate::trace::StreamTrace;

use super::types::OllamaChunk;

/// Fold state for one Ollama stream.
#[derive(Debug)]
pub struct OllamaState {
    lines: LineBuffer,
    blocks: BlockTracker,
    trace: StreamTrace,
    done: bool,
}

/// Normalizer for the Ollama chat NDJSON format.
#[derive(Clone, Copy, Debug, Default)]
pub struct OllamaNormalizer;

impl StreamNormalizer for OllamaNormalizer {
    type State = OllamaState;

    fn init(&self, request: &RequestInfo) -> OllamaState {
        OllamaState {
            lines: LineBuffer::new(),
            blocks: BlockTracker::new(),
            trace: StreamTrace::new(&request.url, &request.model),
            done: false,
        }
    }

    fn process_chunk(
        &self,
        chunk: &[u8],
        mut state: OllamaState,
    ) -> (Vec<StreamEvent>, OllamaState) {
        let mut events = Vec::new();
        for line in state.lines.push(chunk) {
            events.extend(handle_line(&mut state, &line));
        }
        (events, state)
    }

    fn finalize(&self, mut state: OllamaState) -> (Vec<StreamEvent>, OllamaState) {
        let mut events = Vec::new();
        if let Some(line) = state.lines.finish() {
            events.extend(handle_line(&mut state, &line));
        }
        if !state.done {
            events.extend(state.blocks.finalize());
        }
        (events, state)
    }
}

impl OllamaState {
    /// Borrow the diagnostic trace.
    #[must_use]
    pub fn trace(&self) -> &StreamTrace {
        &self.trace
    }
}

fn handle_line(state: &mut OllamaState, line: &str) -> Vec<StreamEvent> {
    if state.done {
        return Vec::new();
    }
    let chunk: OllamaChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(err) => {
            warn!(error = %err, "unparseable line, skipping");
            state.trace.note(format!("skipped unparseable line: {err}"));
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    if let Some(message) = chunk.message {
        if let Some(thinking) = message.thinking {
            if !thinking.is_empty() {
                state.trace.thinking.push_str(&thinking);
                events.extend(state.blocks.content_delta(ContentKind::Thinking, &thinking));
            }
        }
        if let Some(content) = message.content {
            if !content.is_empty() {
                state.trace.text.push_str(&content);
                events.extend(state.blocks.content_delta(ContentKind::Text, &content));
            }
        }
        for call in message.tool_calls.unwrap_or_default() {
            let args = serde_json::to_string(&call.function.arguments)
                .unwrap_or_else(|_| "{}".into());
            state.trace.tool_calls.push((call.function.name.clone(), args));
            events.extend(state.blocks.complete_tool(
                None,
                call.function.name,
                call.function.arguments,
            ));
        }
    }

    if chunk.done {
        state.done = true;
        events.extend(state.blocks.finalize());
        let stop_reason = state
            .blocks
            .resolve_stop_reason(map_ollama_stop_reason(chunk.done_reason.as_deref()));
        state.trace.note(format!("stop_reason={}", stop_reason.as_str()));
        events.push(StreamEvent::Complete {
            usage: TokenUsage {
                input_tokens: chunk.prompt_eval_count.unwrap_or(0),
                output_tokens: chunk.eval_count.unwrap_or(0),
                cached_input_tokens: None,
                cache_creation_tokens: None,
            },
            stop_reason,
            continuation_token: None,
        });
    }
    events
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
