//! OpenAI JSON-over-SSE normalizer.
//!
//! Chat-completion streams deliver untyped `data:` chunks and terminate
//! with a literal `[DONE]`. Tool calls arrive as indexed fragment slots
//! whose ID and name may trail the first fragment; slots without a
//! backend ID get a generated one at block close.

use std::collections::HashSet;

use krait_core::events::{ContentKind, StreamEvent, TokenUsage};
use tracing::warn;

use crate::blocks::BlockTracker;
use crate::normalizer::{RequestInfo, StreamNormalizer};
use crate::sse::SseParser;
use crate::stop_reason::map_openai_stop_reason;
use crate::trace::StreamTrace;

use super::types::{ChatChunk, DONE_SENTINEL};

/// Fold state for one OpenAI stream.
#[derive(Debug)]
pub struct OpenAiState {
    parser: SseParser,
    blocks: BlockTracker,
    trace: StreamTrace,
    /// Backend slot indices with an open tool build.
    open_slots: HashSet<u64>,
    usage: TokenUsage,
    finish_reason: Option<String>,
    done: bool,
}

/// Normalizer for chat-completion SSE streams.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenAiNormalizer;

impl StreamNormalizer for OpenAiNormalizer {
    type State = OpenAiState;

    fn init(&self, request: &RequestInfo) -> OpenAiState {
        OpenAiState {
            parser: SseParser::new(),
            blocks: BlockTracker::new(),
            trace: StreamTrace::new(&request.url, &request.model),
            open_slots: HashSet::new(),
            usage: TokenUsage::default(),
            finish_reason: None,
            done: false,
        }
    }

    fn process_chunk(
        &self,
        chunk: &[u8],
        mut state: OpenAiState,
    ) -> (Vec<StreamEvent>, OpenAiState) {
        let mut events = Vec::new();
        for record in state.parser.push(chunk) {
            events.extend(handle_data(&mut state, &record.data));
        }
        (events, state)
    }

    fn finalize(&self, mut state: OpenAiState) -> (Vec<StreamEvent>, OpenAiState) {
        let mut events = Vec::new();
        if let Some(record) = state.parser.finish() {
            events.extend(handle_data(&mut state, &record.data));
        }
        if !state.done {
            events.extend(state.blocks.finalize());
        }
        (events, state)
    }
}

impl OpenAiState {
    /// Borrow the diagnostic trace.
    #[must_use]
    pub fn trace(&self) -> &StreamTrace {
        &self.trace
    }
}

fn handle_data(state: &mut OpenAiState, data: &str) -> Vec<StreamEvent> {
    if state.done || data.is_empty() {
        return Vec::new();
    }
    if data.trim() == DONE_SENTINEL {
        return complete(state);
    }

    let chunk: ChatChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(err) => {
            warn!(error = %err, "unparseable chunk, skipping");
            state.trace.note(format!("skipped unparseable chunk: {err}"));
            return Vec::new();
        }
    };

    if let Some(usage) = chunk.usage {
        state.usage = TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cached_input_tokens: usage.prompt_tokens_details.and_then(|d| d.cached_tokens),
            cache_creation_tokens: None,
        };
    }

    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(reasoning) = choice.delta.reasoning_content {
            if !reasoning.is_empty() {
                state.trace.thinking.push_str(&reasoning);
                events.extend(state.blocks.content_delta(ContentKind::Thinking, &reasoning));
            }
        }
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                state.trace.text.push_str(&content);
                events.extend(state.blocks.content_delta(ContentKind::Text, &content));
            }
        }
        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let key = tc.index.to_string();
            let (name, arguments) = tc
                .function
                .map(|f| (f.name, f.arguments))
                .unwrap_or((None, None));
            if state.open_slots.insert(tc.index) {
                events.extend(state.blocks.start_tool(
                    &key,
                    tc.id,
                    name.unwrap_or_default(),
                ));
            } else {
                state
                    .blocks
                    .update_tool_meta(&key, tc.id.as_deref(), name.as_deref());
            }
            if let Some(fragment) = arguments {
                if !fragment.is_empty() {
                    events.extend(state.blocks.tool_fragment(&key, &fragment));
                }
            }
        }
        if let Some(reason) = choice.finish_reason {
            state.finish_reason = Some(reason);
        }
    }
    events
}

/// Close all blocks and emit `Complete` (on `[DONE]`).
fn complete(state: &mut OpenAiState) -> Vec<StreamEvent> {
    state.done = true;
    let mut events = state.blocks.finalize();
    for event in &events {
        if let StreamEvent::ToolCall { name, arguments, .. } = event {
            let args = serde_json::to_string(arguments).unwrap_or_else(|_| "{}".into());
            state.trace.tool_calls.push((name.clone(), args));
        }
    }
    let stop_reason = state
        .blocks
        .resolve_stop_reason(map_openai_stop_reason(state.finish_reason.as_deref()));
    state.trace.note(format!("stop_reason={}", stop_reason.as_str()));
    events.push(StreamEvent::Complete {
        usage: state.usage.clone(),
        stop_reason,
        continuation_token: None,
    });
    events
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use krait_core::events::StopReason;
    use krait_core::ids::is_generated_call_id;
    use proptest::prelude::*;

    fn run(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let normalizer = OpenAiNormalizer;
        let request = RequestInfo::new("http://localhost/v1/chat/completions", "test-model");
        let mut state = normalizer.init(&request);
        let mut events = Vec::new();
        for chunk in chunks {
            let (batch, next) = normalizer.process_chunk(chunk, state);
            state = next;
            events.extend(batch);
        }
        let (batch, _state) = normalizer.finalize(state);
        events.extend(batch);
        events
    }

    fn sse(data: &str) -> String {
        format!("data: {data}\n\n")
    }

    fn text_stream_body() -> Vec<u8> {
        [
            sse(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#),
            sse(r#"{"choices":[{"delta":{"content":"lo"}}]}"#),
            sse(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            sse(r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"prompt_tokens_details":{"cached_tokens":2}}}"#),
            sse("[DONE]"),
        ]
        .concat()
        .into_bytes()
    }

    fn tool_stream_body() -> Vec<u8> {
        [
            sse(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_x1","function":{"name":"db_query","arguments":""}}]}}]}"#,
            ),
            sse(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"sql\":"}}]}}]}"#,
            ),
            sse(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":" \"select 1\"}"}}]}}]}"#,
            ),
            sse(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#),
            sse("[DONE]"),
        ]
        .concat()
        .into_bytes()
    }

    #[test]
    fn text_stream_normalizes() {
        let events = run(&[&text_stream_body()]);
        assert_eq!(
            events[0],
            StreamEvent::ContentBlockStart {
                index: 0,
                kind: ContentKind::Text
            }
        );
        match events.last() {
            Some(StreamEvent::Complete { usage, stop_reason, .. }) => {
                assert_eq!(usage.input_tokens, 10);
                assert_eq!(usage.output_tokens, 5);
                assert_eq!(usage.cached_input_tokens, Some(2));
                assert_eq!(*stop_reason, StopReason::EndTurn);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn tool_fragments_assemble_across_chunks() {
        let events = run(&[&tool_stream_body()]);
        let tool = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCall { id, name, arguments, .. } => {
                    Some((id.clone(), name.clone(), arguments.clone()))
                }
                _ => None,
            })
            .expect("tool call emitted");
        assert_eq!(tool.0, "call_x1");
        assert_eq!(tool.1, "db_query");
        assert_eq!(tool.2["sql"], "select 1");
    }

    #[test]
    fn late_id_and_name_attach_to_slot() {
        let body = [
            sse(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{"}}]}}]}"#),
            sse(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_late","function":{"name":"scan","arguments":"}"}}]}}]}"#,
            ),
            sse("[DONE]"),
        ]
        .concat()
        .into_bytes();
        let events = run(&[&body]);
        let tool = events.iter().find_map(|e| match e {
            StreamEvent::ToolCall { id, name, .. } => Some((id.clone(), name.clone())),
            _ => None,
        });
        assert_eq!(tool, Some(("call_late".into(), "scan".into())));
    }

    #[test]
    fn missing_id_gets_generated() {
        let body = [
            sse(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"scan","arguments":"{}"}}]}}]}"#,
            ),
            sse(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#),
            sse("[DONE]"),
        ]
        .concat()
        .into_bytes();
        let events = run(&[&body]);
        let id = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCall { id, .. } => Some(id.clone()),
                _ => None,
            })
            .expect("tool call emitted");
        assert!(is_generated_call_id(&id), "unexpected id {id}");
    }

    #[test]
    fn reasoning_then_content_transitions_blocks() {
        let body = [
            sse(r#"{"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#),
            sse(r#"{"choices":[{"delta":{"content":"Answer"}}]}"#),
            sse("[DONE]"),
        ]
        .concat()
        .into_bytes();
        let events = run(&[&body]);
        assert_eq!(
            events[0],
            StreamEvent::ContentBlockStart {
                index: 0,
                kind: ContentKind::Thinking
            }
        );
        assert!(events.contains(&StreamEvent::ContentBlockStop { index: 0 }));
        assert!(events.contains(&StreamEvent::ContentBlockStart {
            index: 1,
            kind: ContentKind::Text
        }));
    }

    #[test]
    fn tool_call_forces_stop_reason_over_stop() {
        // Some gateways report "stop" even when tool calls were streamed.
        let body = [
            sse(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_y","function":{"name":"scan","arguments":"{}"}}]}}]}"#,
            ),
            sse(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            sse("[DONE]"),
        ]
        .concat()
        .into_bytes();
        let events = run(&[&body]);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Complete {
                stop_reason: StopReason::ToolUse,
                ..
            })
        ));
    }

    #[test]
    fn stream_without_done_still_flushes_blocks() {
        let body = sse(r#"{"choices":[{"delta":{"content":"cut off"}}]}"#).into_bytes();
        let events = run(&[&body]);
        assert!(events.contains(&StreamEvent::ContentBlockStop { index: 0 }));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Complete { .. })));
    }

    proptest! {
        /// Chunk boundaries never change the canonical event sequence.
        #[test]
        fn split_invariance(cuts in proptest::collection::vec(0usize..1000, 0..6)) {
            let body = tool_stream_body();
            let whole = run(&[&body]);

            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c % body.len()).collect();
            cuts.sort_unstable();
            let mut chunks: Vec<&[u8]> = Vec::new();
            let mut start = 0;
            for cut in cuts {
                chunks.push(&body[start..cut.max(start)]);
                start = cut.max(start);
            }
            chunks.push(&body[start..]);

            prop_assert_eq!(run(&chunks), whole);
        }
    }
}
